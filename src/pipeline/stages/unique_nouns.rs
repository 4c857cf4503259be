use crate::error::QueryChartResult;
use crate::gateway::{quote_identifier, DatasetGateway};
use crate::pipeline::state::{PipelineState, RelevantTable, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::shaping::classify::cell_text;
use crate::state_machine::Node;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Stage that collects the distinct values of every noun column
///
/// # State Requirements
/// - Input: `parsed_question`
///
/// # State Outputs
/// - `unique_nouns` - Sorted set of non-empty values, as text
///
/// Issues one `SELECT DISTINCT` per relevant table; nothing when the question
/// is not relevant.
pub struct GetUniqueNounsStage {
    gateway: Arc<dyn DatasetGateway>,
}

impl GetUniqueNounsStage {
    pub fn new(gateway: Arc<dyn DatasetGateway>) -> Self {
        Self { gateway }
    }
}

/// Distinct-values query for one table, `None` without noun columns
pub fn distinct_values_query(table: &RelevantTable) -> Option<String> {
    if table.noun_columns.is_empty() {
        return None;
    }
    let columns = table
        .noun_columns
        .iter()
        .map(|c| quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!(
        "SELECT DISTINCT {} FROM {}",
        columns,
        quote_identifier(&table.table_name)
    ))
}

#[async_trait]
impl PipelineStage for GetUniqueNounsStage {
    fn node(&self) -> Node {
        Node::GetUniqueNouns
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.parsed_question().is_none()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let mut nouns = BTreeSet::new();

        if let Some(parsed) = state.parsed_question().filter(|p| p.is_relevant) {
            for table in &parsed.relevant_tables {
                let Some(sql) = distinct_values_query(table) else {
                    continue;
                };
                debug!(target: "pipeline::unique_nouns", "Querying: {} (run: {})", sql, state.run_id());

                let rows = self.gateway.execute_query(state.dataset_id(), &sql).await?;
                nouns.extend(
                    rows.iter()
                        .flatten()
                        .filter(|cell| !cell.is_null())
                        .map(|cell: &Value| cell_text(cell))
                        .filter(|text| !text.trim().is_empty()),
                );
            }
        }

        info!(
            target: "pipeline::unique_nouns",
            "Collected {} unique nouns (run: {})",
            nouns.len(),
            state.run_id()
        );

        Ok(StateUpdate {
            unique_nouns: Some(nouns),
            ..StateUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::pipeline::stages::test_support::{relevant, SCHEMA};
    use crate::pipeline::state::ParsedQuestion;
    use serde_json::json;

    fn state_with(parsed: ParsedQuestion) -> PipelineState {
        let mut state = PipelineState::new("q", "d");
        state.apply(&StateUpdate {
            parsed_question: Some(parsed),
            ..StateUpdate::default()
        });
        state
    }

    #[test]
    fn test_query_quotes_identifiers() {
        let table = RelevantTable {
            table_name: "gross income".into(),
            columns: vec![],
            noun_columns: vec!["first name".into(), "we`ird".into()],
        };
        assert_eq!(
            distinct_values_query(&table).unwrap(),
            "SELECT DISTINCT `first name`, `we``ird` FROM `gross income`"
        );
    }

    #[tokio::test]
    async fn test_values_are_unioned_as_text() {
        let gateway = Arc::new(
            InMemoryGateway::new().with_schema("d", SCHEMA).with_result(
                "SELECT DISTINCT `product`, `region` FROM `sales`",
                vec![
                    vec![json!("Widget"), json!("North")],
                    vec![json!("Gadget"), json!(null)],
                    vec![json!(""), json!(42)],
                    vec![json!("Widget"), json!("South")],
                ],
            ),
        );
        let stage = GetUniqueNounsStage::new(gateway.clone());

        let update = stage.execute(&state_with(relevant())).await.unwrap();
        let nouns: Vec<String> = update.unique_nouns.unwrap().into_iter().collect();
        assert_eq!(nouns, vec!["42", "Gadget", "North", "South", "Widget"]);
        assert_eq!(gateway.executed_queries().len(), 1);
    }

    #[tokio::test]
    async fn test_not_relevant_issues_no_query() {
        let gateway = Arc::new(InMemoryGateway::new().with_schema("d", SCHEMA));
        let stage = GetUniqueNounsStage::new(gateway.clone());

        let update = stage
            .execute(&state_with(ParsedQuestion::not_relevant()))
            .await
            .unwrap();
        assert_eq!(update.unique_nouns, Some(BTreeSet::new()));
        assert!(gateway.executed_queries().is_empty());
    }

    #[tokio::test]
    async fn test_tables_without_noun_columns_skipped() {
        let gateway = Arc::new(InMemoryGateway::new().with_schema("d", SCHEMA));
        let stage = GetUniqueNounsStage::new(gateway.clone());
        let mut parsed = relevant();
        parsed.relevant_tables[0].noun_columns.clear();

        let update = stage.execute(&state_with(parsed)).await.unwrap();
        assert!(update.unique_nouns.unwrap().is_empty());
        assert!(gateway.executed_queries().is_empty());
    }

    #[test]
    fn test_skipped_without_parsed_question() {
        let stage = GetUniqueNounsStage::new(Arc::new(InMemoryGateway::new()));
        assert!(stage.should_skip(&PipelineState::new("q", "d")));
        assert!(!stage.should_skip(&state_with(relevant())));
    }
}

use super::load_schema;
use crate::error::{QueryChartError, QueryChartResult};
use crate::gateway::DatasetGateway;
use crate::llm::json::{parse_json, strip_code_fences};
use crate::llm::prompts::VALIDATE_SQL;
use crate::llm::{PromptValues, TextGenerator};
use crate::logger::truncate_for_log;
use crate::pipeline::state::{PipelineState, SqlQuery, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Structured reply of the validation prompt
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqlVerdict {
    pub valid: bool,

    #[serde(default)]
    pub issues: Option<String>,

    #[serde(default, alias = "correctedQuery")]
    pub corrected_query: Option<String>,
}

impl SqlVerdict {
    /// Valid with no issue text: the query goes through untouched
    pub fn is_clean_pass(&self) -> bool {
        self.valid && self.issues.as_deref().map_or(true, |i| i.trim().is_empty())
    }

    /// Corrected query text, ignoring blank and "None" placeholders
    pub fn correction(&self) -> Option<&str> {
        self.corrected_query
            .as_deref()
            .map(|q| strip_code_fences(q).trim())
            .filter(|q| !q.is_empty() && !q.eq_ignore_ascii_case("none"))
    }

    /// State changes this verdict makes to `original`
    pub fn into_update(self, original: &str) -> StateUpdate {
        if self.is_clean_pass() {
            return StateUpdate {
                sql_query: Some(SqlQuery::Query(original.to_string())),
                sql_valid: Some(true),
                ..StateUpdate::default()
            };
        }

        let query = self.correction().unwrap_or(original).to_string();
        StateUpdate {
            sql_query: Some(SqlQuery::Query(query)),
            sql_valid: Some(self.valid),
            sql_issues: self.issues.filter(|i| !i.trim().is_empty()),
            ..StateUpdate::default()
        }
    }
}

/// Stage that has the model check the query against the schema and repair it
///
/// # State Requirements
/// - Input: `sql_query`, `schema` (fetched when absent)
///
/// # State Outputs
/// - `sql_query` - Original query on a clean pass, otherwise the correction
/// - `sql_valid` - Model verdict; false for the not-relevant marker
/// - `sql_issues` - Issue description when one was reported
///
/// A verdict that is not valid JSON ends the run.
pub struct ValidateAndFixSqlStage {
    gateway: Arc<dyn DatasetGateway>,
    generator: Arc<dyn TextGenerator>,
}

impl ValidateAndFixSqlStage {
    pub fn new(gateway: Arc<dyn DatasetGateway>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { gateway, generator }
    }
}

#[async_trait]
impl PipelineStage for ValidateAndFixSqlStage {
    fn node(&self) -> Node {
        Node::ValidateAndFixSql
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.sql_query().is_none()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let Some(sql) = state.sql_query().and_then(SqlQuery::as_query) else {
            return Ok(StateUpdate {
                sql_query: Some(SqlQuery::NotRelevant),
                sql_valid: Some(false),
                ..StateUpdate::default()
            });
        };

        let schema = load_schema(self.gateway.as_ref(), state).await?;
        let values = PromptValues::new()
            .with("schema", schema)
            .with("sql_query", sql);
        let response = self.generator.complete(&VALIDATE_SQL, &values).await?;

        let verdict: SqlVerdict = parse_json(&response).map_err(|e| {
            QueryChartError::malformed(
                self.name(),
                format!("{} in reply: {}", e, truncate_for_log(&response, 200)),
            )
        })?;

        if verdict.is_clean_pass() {
            info!(target: "pipeline::validate_sql", "Query passed validation (run: {})", state.run_id());
        } else {
            warn!(
                target: "pipeline::validate_sql",
                "Query flagged (valid: {}): {} (run: {})",
                verdict.valid,
                verdict.issues.as_deref().unwrap_or("no issue text"),
                state.run_id()
            );
        }

        Ok(verdict.into_update(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::llm::ScriptedGenerator;
    use crate::pipeline::stages::test_support::SCHEMA;

    const ORIGINAL: &str = "SELECT product FROM sales";

    fn state_with(query: SqlQuery) -> PipelineState {
        let mut state = PipelineState::new("q", "d");
        state.apply(&StateUpdate {
            schema: Some(SCHEMA.into()),
            sql_query: Some(query),
            ..StateUpdate::default()
        });
        state
    }

    async fn run(reply: &str) -> QueryChartResult<StateUpdate> {
        let generator = Arc::new(ScriptedGenerator::new().respond("validate_sql", reply));
        let stage = ValidateAndFixSqlStage::new(Arc::new(InMemoryGateway::new()), generator);
        stage.execute(&state_with(SqlQuery::Query(ORIGINAL.into()))).await
    }

    #[tokio::test]
    async fn test_clean_pass_keeps_original() {
        let update = run(r#"{"valid": true, "issues": null, "corrected_query": "None"}"#)
            .await
            .unwrap();
        assert_eq!(update.sql_query, Some(SqlQuery::Query(ORIGINAL.into())));
        assert_eq!(update.sql_valid, Some(true));
        assert!(update.sql_issues.is_none());
    }

    #[tokio::test]
    async fn test_correction_replaces_query() {
        let update = run(
            r#"{"valid": false, "issues": "Names must be quoted", "corrected_query": "SELECT `product` FROM `sales`"}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            update.sql_query,
            Some(SqlQuery::Query("SELECT `product` FROM `sales`".into()))
        );
        assert_eq!(update.sql_valid, Some(false));
        assert_eq!(update.sql_issues.as_deref(), Some("Names must be quoted"));
    }

    #[tokio::test]
    async fn test_valid_with_issues_uses_correction() {
        let update = run(
            r#"{"valid": true, "issues": "Unquoted column", "corrected_query": "SELECT `product` FROM sales"}"#,
        )
        .await
        .unwrap();
        assert_eq!(
            update.sql_query,
            Some(SqlQuery::Query("SELECT `product` FROM sales".into()))
        );
        assert_eq!(update.sql_valid, Some(true));
    }

    #[tokio::test]
    async fn test_missing_correction_keeps_original() {
        let update = run(r#"{"valid": false, "issues": "Ambiguous", "corrected_query": "None"}"#)
            .await
            .unwrap();
        assert_eq!(update.sql_query, Some(SqlQuery::Query(ORIGINAL.into())));
        assert_eq!(update.sql_valid, Some(false));
        assert_eq!(update.sql_issues.as_deref(), Some("Ambiguous"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_fatal() {
        let err = run("Looks fine to me").await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_not_relevant_short_circuits() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = ValidateAndFixSqlStage::new(Arc::new(InMemoryGateway::new()), generator.clone());

        let update = stage.execute(&state_with(SqlQuery::NotRelevant)).await.unwrap();
        assert_eq!(update.sql_query, Some(SqlQuery::NotRelevant));
        assert_eq!(update.sql_valid, Some(false));
        assert!(generator.calls().is_empty());
    }

    #[test]
    fn test_skipped_without_query() {
        let stage =
            ValidateAndFixSqlStage::new(Arc::new(InMemoryGateway::new()), Arc::new(ScriptedGenerator::new()));
        assert!(stage.should_skip(&PipelineState::new("q", "d")));
    }
}

use super::load_schema;
use crate::error::{QueryChartError, QueryChartResult};
use crate::gateway::DatasetGateway;
use crate::llm::json::strip_code_fences;
use crate::llm::prompts::GENERATE_SQL;
use crate::llm::{PromptValues, TextGenerator};
use crate::pipeline::state::{PipelineState, SqlQuery, StateUpdate, NOT_RELEVANT};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Model reply meaning the schema cannot answer the question
pub const NOT_ENOUGH_INFO: &str = "NOT_ENOUGH_INFO";

/// Stage that asks the model for a single SQL statement
///
/// # State Requirements
/// - Input: `parsed_question`, `unique_nouns`, `schema` (fetched when absent)
///
/// # State Outputs
/// - `sql_query` - Generated query, or `NotRelevant`
pub struct GenerateSqlStage {
    gateway: Arc<dyn DatasetGateway>,
    generator: Arc<dyn TextGenerator>,
}

impl GenerateSqlStage {
    pub fn new(gateway: Arc<dyn DatasetGateway>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { gateway, generator }
    }
}

/// Interpret the model's reply as a query or the not-relevant decision
pub fn interpret_sql_reply(reply: &str) -> QueryChartResult<SqlQuery> {
    let sql = strip_code_fences(reply).trim();
    if sql.is_empty() {
        return Err(QueryChartError::EmptyCompletion);
    }
    if sql == NOT_ENOUGH_INFO || sql == NOT_RELEVANT {
        return Ok(SqlQuery::NotRelevant);
    }
    Ok(SqlQuery::Query(sql.to_string()))
}

#[async_trait]
impl PipelineStage for GenerateSqlStage {
    fn node(&self) -> Node {
        Node::GenerateSql
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.parsed_question().is_none()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let parsed = match state.parsed_question() {
            Some(parsed) if parsed.is_relevant => parsed,
            _ => {
                info!(target: "pipeline::generate_sql", "Question not relevant, no SQL generated (run: {})", state.run_id());
                return Ok(StateUpdate {
                    sql_query: Some(SqlQuery::NotRelevant),
                    ..StateUpdate::default()
                });
            }
        };

        let schema = load_schema(self.gateway.as_ref(), state).await?;
        let nouns: Vec<&String> = state.unique_nouns().iter().collect();

        let values = PromptValues::new()
            .with("schema", schema)
            .with("question", state.question())
            .with("parsed_question", serde_json::to_string(parsed)?)
            .with("unique_nouns", serde_json::to_string(&nouns)?);
        let response = self.generator.complete(&GENERATE_SQL, &values).await?;

        let sql_query = interpret_sql_reply(&response)?;
        info!(
            target: "pipeline::generate_sql",
            "Generated query: {} (run: {})",
            sql_query,
            state.run_id()
        );

        Ok(StateUpdate {
            sql_query: Some(sql_query),
            ..StateUpdate::default()
        })
    }
}

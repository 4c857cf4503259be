use crate::error::{QueryChartError, QueryChartResult};
use crate::gateway::DatasetGateway;
use crate::llm::json::parse_json;
use crate::llm::prompts::PARSE_QUESTION;
use crate::llm::{PromptValues, TextGenerator};
use crate::logger::truncate_for_log;
use crate::pipeline::state::{ParsedQuestion, PipelineState, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Stage that decides whether the question can be answered from the dataset
///
/// # State Requirements
/// - Input: `question`, `dataset_id`
///
/// # State Outputs
/// - `schema` - Schema text, cached for later stages
/// - `parsed_question` - Relevance flag plus relevant tables and noun columns
///
/// A schema fetch failure is recorded and leaves `parsed_question` unset, so
/// every downstream query stage skips. A reply that is not valid JSON ends the run.
pub struct ParseQuestionStage {
    gateway: Arc<dyn DatasetGateway>,
    generator: Arc<dyn TextGenerator>,
}

impl ParseQuestionStage {
    pub fn new(gateway: Arc<dyn DatasetGateway>, generator: Arc<dyn TextGenerator>) -> Self {
        Self { gateway, generator }
    }
}

#[async_trait]
impl PipelineStage for ParseQuestionStage {
    fn node(&self) -> Node {
        Node::ParseQuestion
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let schema = self.gateway.get_schema(state.dataset_id()).await.map_err(|e| {
            warn!(
                target: "pipeline::parse_question",
                "Schema fetch failed for dataset {}: {} (run: {})",
                state.dataset_id(),
                e,
                state.run_id()
            );
            e
        })?;

        let values = PromptValues::new()
            .with("schema", schema.as_str())
            .with("question", state.question());
        let response = self.generator.complete(&PARSE_QUESTION, &values).await?;

        let parsed: ParsedQuestion = parse_json(&response).map_err(|e| {
            QueryChartError::malformed(
                self.name(),
                format!("{} in reply: {}", e, truncate_for_log(&response, 200)),
            )
        })?;

        info!(
            target: "pipeline::parse_question",
            "Question is {} ({} relevant tables, run: {})",
            if parsed.is_relevant { "relevant" } else { "not relevant" },
            parsed.relevant_tables.len(),
            state.run_id()
        );

        Ok(StateUpdate {
            schema: Some(schema),
            parsed_question: Some(parsed),
            ..StateUpdate::default()
        })
    }
}

use crate::error::{QueryChartError, QueryChartResult};
use crate::llm::prompts::CHOOSE_VISUALIZATION;
use crate::llm::{PromptValues, TextGenerator};
use crate::logger::truncate_for_log;
use crate::pipeline::state::{PipelineState, QueryResults, StateUpdate, Visualization};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub const NOT_RELEVANT_REASON: &str = "No visualization needed for irrelevant questions.";
pub const UNREADABLE_REASON: &str = "Could not interpret visualization recommendation";

/// Stage that picks a chart family for the results
///
/// # State Requirements
/// - Input: `results`
///
/// # State Outputs
/// - `visualization` - Appended chart tag
/// - `visualization_reason` - Appended one-line justification
///
/// A reply that does not follow the two-line format falls back to `none`
/// and records the problem in `error`.
pub struct ChooseVisualizationStage {
    generator: Arc<dyn TextGenerator>,
}

impl ChooseVisualizationStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

/// Parse `Recommended Visualization: X` / `Reason: Y`
pub fn parse_recommendation(reply: &str) -> QueryChartResult<(Visualization, String)> {
    let mut lines = reply.lines().map(str::trim).filter(|l| !l.is_empty());
    let malformed = |message: &str| QueryChartError::malformed(Node::ChooseVisualization.name(), message);

    let tag_line = lines.next().ok_or_else(|| malformed("empty recommendation"))?;
    let reason_line = lines.next().ok_or_else(|| malformed("missing reason line"))?;

    let (_, tag) = tag_line
        .split_once(':')
        .ok_or_else(|| malformed("recommendation line has no ':'"))?;
    let (_, reason) = reason_line
        .split_once(':')
        .ok_or_else(|| malformed("reason line has no ':'"))?;

    Ok((tag.parse()?, reason.trim().to_string()))
}

#[async_trait]
impl PipelineStage for ChooseVisualizationStage {
    fn node(&self) -> Node {
        Node::ChooseVisualization
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.results().is_none()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let results = match state.results() {
            Some(QueryResults::NotRelevant) | None => {
                return Ok(StateUpdate {
                    visualization: Some(Visualization::None),
                    visualization_reason: Some(NOT_RELEVANT_REASON.to_string()),
                    ..StateUpdate::default()
                });
            }
            Some(results) => results,
        };

        let sql = state.sql_query().map(|q| q.to_string()).unwrap_or_default();
        let values = PromptValues::new()
            .with("question", state.question())
            .with("sql_query", sql)
            .with("results", results.to_prompt_text());
        let response = self.generator.complete(&CHOOSE_VISUALIZATION, &values).await?;

        match parse_recommendation(&response) {
            Ok((visualization, reason)) => {
                info!(
                    target: "pipeline::choose_visualization",
                    "Chose {} (run: {})",
                    visualization,
                    state.run_id()
                );
                Ok(StateUpdate {
                    visualization: Some(visualization),
                    visualization_reason: Some(reason),
                    ..StateUpdate::default()
                })
            }
            Err(e) => {
                warn!(
                    target: "pipeline::choose_visualization",
                    "{}: {} (run: {})",
                    e,
                    truncate_for_log(&response, 120),
                    state.run_id()
                );
                Ok(StateUpdate {
                    visualization: Some(Visualization::None),
                    visualization_reason: Some(UNREADABLE_REASON.to_string()),
                    error: Some(e.to_string()),
                    ..StateUpdate::default()
                })
            }
        }
    }
}

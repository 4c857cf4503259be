use crate::error::QueryChartResult;
use crate::llm::prompts::FORMAT_RESULTS;
use crate::llm::{PromptValues, TextGenerator};
use crate::pipeline::state::{PipelineState, QueryResults, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Fixed answer for questions the dataset cannot answer
pub const NOT_RELEVANT_ANSWER: &str = "Sorry, I can only give answers relevant to the database.";

/// Stage that writes the natural-language answer
///
/// # State Requirements
/// - Input: `results` (optional)
///
/// # State Outputs
/// - `answer` - Appended one-line summary
///
/// Never skipped: with no results the answer reports the recorded error.
pub struct FormatResultsStage {
    generator: Arc<dyn TextGenerator>,
}

impl FormatResultsStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }
}

fn unanswered(state: &PipelineState) -> String {
    match state.error() {
        Some(error) => format!("I couldn't answer that question: {}", error),
        None => "I couldn't answer that question: no results were produced.".to_string(),
    }
}

#[async_trait]
impl PipelineStage for FormatResultsStage {
    fn node(&self) -> Node {
        Node::FormatResults
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let answer = match state.results() {
            Some(QueryResults::NotRelevant) => NOT_RELEVANT_ANSWER.to_string(),
            None => {
                debug!(target: "pipeline::format_results", "No results to format (run: {})", state.run_id());
                unanswered(state)
            }
            Some(results) => {
                let values = PromptValues::new()
                    .with("question", state.question())
                    .with("results", results.to_prompt_text());
                let response = self.generator.complete(&FORMAT_RESULTS, &values).await?;
                response.trim().to_string()
            }
        };

        info!(target: "pipeline::format_results", "Answer ready (run: {})", state.run_id());

        Ok(StateUpdate {
            answer: Some(answer),
            ..StateUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGenerator;
    use serde_json::json;

    fn state_with(results: Option<QueryResults>, error: Option<&str>) -> PipelineState {
        let mut state = PipelineState::new("Top product?", "d");
        state.apply(&StateUpdate {
            results,
            error: error.map(String::from),
            ..StateUpdate::default()
        });
        state
    }

    #[tokio::test]
    async fn test_rows_summarized_by_model() {
        let generator = Arc::new(
            ScriptedGenerator::new().respond("format_results", "  The top product is Widget with 12 sales.\n"),
        );
        let stage = FormatResultsStage::new(generator.clone());
        let state = state_with(Some(QueryResults::Rows(vec![vec![json!("Widget"), json!(12)]])), None);

        let update = stage.execute(&state).await.unwrap();
        assert_eq!(update.answer.as_deref(), Some("The top product is Widget with 12 sales."));
        assert_eq!(generator.calls()[0].values.get("results"), Some(r#"[["Widget",12]]"#));
    }

    #[tokio::test]
    async fn test_not_relevant_apology() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = FormatResultsStage::new(generator.clone());

        let update = stage
            .execute(&state_with(Some(QueryResults::NotRelevant), None))
            .await
            .unwrap();
        assert_eq!(update.answer.as_deref(), Some(NOT_RELEVANT_ANSWER));
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_execution_error_surfaced_without_model() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = FormatResultsStage::new(generator.clone());

        let update = stage
            .execute(&state_with(None, Some("Query execution failed: no such table: users")))
            .await
            .unwrap();
        assert!(update.answer.unwrap().contains("no such table: users"));
        assert!(generator.calls().is_empty());
    }

    #[test]
    fn test_never_skipped() {
        let stage = FormatResultsStage::new(Arc::new(ScriptedGenerator::new()));
        assert!(!stage.should_skip(&PipelineState::new("q", "d")));
    }
}

//! Pipeline stages for the question workflow
//!
//! This module contains the individual stages that make up the question pipeline:
//! 1. ParseQuestionStage - Classify relevance and pick tables/columns
//! 2. GetUniqueNounsStage - Collect distinct values of noun columns
//! 3. GenerateSqlStage - Ask the model for one SQL statement
//! 4. ValidateAndFixSqlStage - Have the model check and repair the query
//! 5. ExecuteSqlStage - Run the query through the dataset gateway
//! 6. FormatResultsStage - Summarize the rows as a one-line answer
//! 7. ChooseVisualizationStage - Pick a chart family
//! 8. FormatDataForVisualizationStage - Shape rows for the chosen chart

pub mod choose_visualization;
pub mod execute_sql;
pub mod format_results;
pub mod format_visualization;
pub mod generate_sql;
pub mod parse_question;
pub mod unique_nouns;
pub mod validate_sql;

// Re-export stages
pub use choose_visualization::ChooseVisualizationStage;
pub use execute_sql::ExecuteSqlStage;
pub use format_results::FormatResultsStage;
pub use format_visualization::FormatDataForVisualizationStage;
pub use generate_sql::GenerateSqlStage;
pub use parse_question::ParseQuestionStage;
pub use unique_nouns::GetUniqueNounsStage;
pub use validate_sql::ValidateAndFixSqlStage;

use crate::error::QueryChartResult;
use crate::gateway::DatasetGateway;
use crate::pipeline::state::PipelineState;
use tracing::debug;

/// Schema cached by an earlier stage, fetched again only when absent
pub(crate) async fn load_schema(
    gateway: &dyn DatasetGateway,
    state: &PipelineState,
) -> QueryChartResult<String> {
    match state.schema() {
        Some(schema) => Ok(schema.to_string()),
        None => {
            debug!(
                target: "pipeline",
                "Schema not cached, fetching for dataset {} (run: {})",
                state.dataset_id(),
                state.run_id()
            );
            gateway.get_schema(state.dataset_id()).await
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::pipeline::state::StateUpdate;

    #[tokio::test]
    async fn test_cached_schema_is_reused() {
        let gateway = InMemoryGateway::new().with_schema("d", "fresh");
        let mut state = PipelineState::new("q", "d");
        state.apply(&StateUpdate {
            schema: Some("cached".into()),
            ..StateUpdate::default()
        });

        assert_eq!(load_schema(&gateway, &state).await.unwrap(), "cached");
        assert_eq!(gateway.schema_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_is_fetched() {
        let gateway = InMemoryGateway::new().with_schema("d", "fresh");
        let state = PipelineState::new("q", "d");

        assert_eq!(load_schema(&gateway, &state).await.unwrap(), "fresh");
        assert_eq!(gateway.schema_calls(), 1);
    }
}

use crate::error::QueryChartResult;
use crate::llm::TextGenerator;
use crate::pipeline::state::{PipelineState, StateUpdate};
use crate::pipeline::PipelineStage;
use crate::shaping::{FormattedData, RawRows, ResultShaper, ShapingInput};
use crate::state_machine::Node;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Stage that shapes the result rows for the chosen chart
///
/// # State Requirements
/// - Input: `visualization` (latest), `results`
///
/// # State Outputs
/// - `formatted_data` - Chart payload, or `Failed` with the raw model text
/// - `error` - Set when shaping failed
pub struct FormatDataForVisualizationStage {
    shaper: ResultShaper,
}

impl FormatDataForVisualizationStage {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            shaper: ResultShaper::new(generator),
        }
    }
}

#[async_trait]
impl PipelineStage for FormatDataForVisualizationStage {
    fn node(&self) -> Node {
        Node::FormatDataForVisualization
    }

    fn should_skip(&self, state: &PipelineState) -> bool {
        state.visualization_log().is_empty()
    }

    async fn execute(&self, state: &PipelineState) -> QueryChartResult<StateUpdate> {
        let Some(rows) = state.results().and_then(|r| r.rows()) else {
            return Ok(StateUpdate::default());
        };

        let sql = state.sql_query().map(|q| q.to_string()).unwrap_or_default();
        let input = ShapingInput {
            visualization: state.visualization(),
            rows: RawRows::Rows(rows.to_vec()),
            question: state.question(),
            sql_query: &sql,
        };

        let formatted = self.shaper.shape(&input).await;
        let error = match &formatted {
            Some(FormattedData::Failed { error, .. }) => {
                warn!(
                    target: "pipeline::format_visualization",
                    "Could not shape {} data: {} (run: {})",
                    input.visualization,
                    error,
                    state.run_id()
                );
                Some(error.clone())
            }
            Some(FormattedData::Chart(_)) => {
                info!(
                    target: "pipeline::format_visualization",
                    "Shaped {} rows for {} (run: {})",
                    rows.len(),
                    input.visualization,
                    state.run_id()
                );
                None
            }
            None => None,
        };

        Ok(StateUpdate {
            formatted_data: formatted,
            error,
            ..StateUpdate::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGenerator;
    use crate::pipeline::state::{QueryResults, Visualization};
    use crate::shaping::{BarChart, BarSeries, ChartData};
    use serde_json::json;

    fn state_with(visualization: Visualization, results: QueryResults) -> PipelineState {
        let mut state = PipelineState::new("Units per product?", "d");
        state.apply(&StateUpdate {
            results: Some(results),
            visualization: Some(visualization),
            ..StateUpdate::default()
        });
        state
    }

    #[tokio::test]
    async fn test_bar_chart_shaped() {
        let generator = Arc::new(ScriptedGenerator::new().respond("series_label", "Units"));
        let stage = FormatDataForVisualizationStage::new(generator);
        let state = state_with(
            Visualization::Bar,
            QueryResults::Rows(vec![vec![json!("Widget"), json!(12)], vec![json!("Gadget"), json!(5)]]),
        );

        let update = stage.execute(&state).await.unwrap();
        assert_eq!(
            update.formatted_data,
            Some(FormattedData::Chart(ChartData::Bar(BarChart {
                labels: vec!["Widget".into(), "Gadget".into()],
                values: vec![BarSeries {
                    data: vec![12.0, 5.0],
                    label: "Units".into(),
                }],
            })))
        );
        assert!(update.error.is_none());
    }

    #[tokio::test]
    async fn test_none_visualization_gives_no_data() {
        let generator = Arc::new(ScriptedGenerator::new());
        let stage = FormatDataForVisualizationStage::new(generator.clone());
        let state = state_with(Visualization::None, QueryResults::Rows(vec![vec![json!("a"), json!(1)]]));

        let update = stage.execute(&state).await.unwrap();
        assert!(update.formatted_data.is_none());
        assert!(generator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fallback_records_error() {
        let generator = Arc::new(ScriptedGenerator::new().respond("format_chart_data", "no idea"));
        let stage = FormatDataForVisualizationStage::new(generator);
        let state = state_with(
            Visualization::Pie,
            QueryResults::Rows(vec![vec![json!("A"), json!(60)], vec![json!("B"), json!(40)]]),
        );

        let update = stage.execute(&state).await.unwrap();
        assert!(matches!(update.formatted_data, Some(FormattedData::Failed { .. })));
        assert!(update.error.unwrap().starts_with("Invalid JSON from model"));
    }

    #[test]
    fn test_skipped_before_a_choice() {
        let stage = FormatDataForVisualizationStage::new(Arc::new(ScriptedGenerator::new()));
        assert!(stage.should_skip(&PipelineState::new("q", "d")));
    }
}

//! Model-backed fallback shaping
//!
//! The model is shown one example payload for the chart family and asked to
//! restructure the raw results the same way. Output is parsed tolerantly;
//! anything that still is not JSON comes back as `FormattedData::Failed`.

use super::{ChartData, FormattedData, ShapingInput};
use crate::llm::json::parse_json_value;
use crate::llm::prompts::FORMAT_CHART_DATA;
use crate::llm::{PromptValues, TextGenerator};
use crate::logger::truncate_for_log;
use crate::pipeline::state::Visualization;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Example payload for a chart family
pub fn example_template(visualization: Visualization) -> Option<Value> {
    let template = match visualization {
        Visualization::Bar => json!({
            "labels": ["Jan", "Feb", "Mar", "Apr", "May", "Jun"],
            "values": [
                {"data": [21.5, 25.0, 47.5, 64.8, 105.5, 133.2], "label": "Income"}
            ]
        }),
        Visualization::HorizontalBar => json!({
            "labels": ["Jan", "Feb", "Mar", "Apr", "May", "Jun"],
            "values": [
                {"data": [21.5, 25.0, 47.5, 64.8, 105.5, 133.2], "label": ""}
            ]
        }),
        Visualization::Line => json!({
            "xValues": [1, 2, 3, 5, 8, 10],
            "yValues": [
                {"data": [2, 5.5, 2, 8.5, 1.5, 5], "label": ""},
                {"data": [3, 4.5, 6, 7.5, 2.5, 6], "label": ""}
            ]
        }),
        Visualization::Pie => json!([
            {"id": 0, "value": 10, "label": ""},
            {"id": 1, "value": 15, "label": ""},
            {"id": 2, "value": 20, "label": ""}
        ]),
        Visualization::Scatter => json!({
            "series": [
                {"data": [{"x": 100, "y": 200, "id": 1}, {"x": 120, "y": 100, "id": 2}], "label": ""},
                {"data": [{"x": 300, "y": 300, "id": 1}, {"x": 400, "y": 500, "id": 2}], "label": ""}
            ]
        }),
        Visualization::None => return None,
    };
    Some(template)
}

/// Ask the model to shape the rows after the family's example
pub async fn shape_with_model(generator: &dyn TextGenerator, input: &ShapingInput<'_>) -> FormattedData {
    let Some(template) = example_template(input.visualization) else {
        return FormattedData::Failed {
            error: format!("No example structure for visualization '{}'", input.visualization),
            raw_response: String::new(),
        };
    };

    let values = PromptValues::new()
        .with("question", input.question)
        .with("sql_query", input.sql_query)
        .with("results", input.rows.to_prompt_text())
        .with("instructions", template.to_string());

    let response = match generator.complete(&FORMAT_CHART_DATA, &values).await {
        Ok(text) => text,
        Err(e) => {
            warn!(target: "shaping::fallback", "Fallback formatting request failed: {}", e);
            return FormattedData::Failed {
                error: e.to_string(),
                raw_response: String::new(),
            };
        }
    };

    match parse_json_value(&response) {
        Ok(value) => {
            debug!(target: "shaping::fallback", "Fallback produced {} data", input.visualization);
            FormattedData::Chart(ChartData::Generic(value))
        }
        Err(e) => {
            warn!(
                target: "shaping::fallback",
                "Model output for {} is not JSON: {} ({})",
                input.visualization,
                e,
                truncate_for_log(&response, 120)
            );
            FormattedData::Failed {
                error: format!("Invalid JSON from model: {}", e),
                raw_response: response,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedGenerator;
    use crate::shaping::RawRows;

    fn input(visualization: Visualization) -> ShapingInput<'static> {
        ShapingInput {
            visualization,
            rows: RawRows::Rows(vec![vec![json!("A"), json!(10)], vec![json!("B"), json!(20)]]),
            question: "Market share per company?",
            sql_query: "SELECT company, share FROM market",
        }
    }

    #[test]
    fn test_every_chart_family_has_template() {
        for visualization in Visualization::ALL {
            let template = example_template(visualization);
            assert_eq!(template.is_none(), visualization == Visualization::None);
        }
    }

    #[tokio::test]
    async fn test_fenced_output_is_accepted() {
        let generator = ScriptedGenerator::new().respond(
            "format_chart_data",
            "Sure!\n```json\n[{\"id\": 0, \"value\": 10, \"label\": \"A\"}]\n```",
        );
        let out = shape_with_model(&generator, &input(Visualization::Pie)).await;
        assert_eq!(
            out,
            FormattedData::Chart(ChartData::Generic(json!([{"id": 0, "value": 10, "label": "A"}])))
        );

        let call = &generator.calls()[0];
        assert!(call.values.get("instructions").unwrap().contains("\"value\":10"));
        assert_eq!(call.values.get("sql_query"), Some("SELECT company, share FROM market"));
    }

    #[tokio::test]
    async fn test_unparseable_output_is_kept() {
        let generator = ScriptedGenerator::new().respond("format_chart_data", "I cannot do that.");
        let out = shape_with_model(&generator, &input(Visualization::Pie)).await;
        match out {
            FormattedData::Failed { error, raw_response } => {
                assert!(error.starts_with("Invalid JSON from model"));
                assert_eq!(raw_response, "I cannot do that.");
            }
            other => panic!("unexpected output: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_generation_failure_is_kept() {
        let generator = ScriptedGenerator::new().fail("format_chart_data", "rate limited");
        let out = shape_with_model(&generator, &input(Visualization::Bar)).await;
        assert!(matches!(out, FormattedData::Failed { .. }));
    }
}

//! Result shaping
//!
//! Turns raw positional rows into the data structure each chart family
//! expects. Bar, line and scatter have dedicated shapers driven by
//! [`classify`]; every other family, and any row set a dedicated shaper
//! rejects, goes through the model-backed [`fallback`].
//!
//! Shaping never fails outright: the worst case is
//! [`FormattedData::Failed`] carrying the raw model text.

pub mod bar;
pub mod classify;
pub mod fallback;
pub mod line;
pub mod scatter;

pub use classify::{classify_cell, infer_row_roles, CellRole, RowRoles};

use crate::error::{QueryChartError, QueryChartResult};
use crate::gateway::decode_rows;
use crate::llm::prompts::{SERIES_LABEL, Y_AXIS_LABEL};
use crate::llm::{PromptTemplate, PromptValues, TextGenerator};
use crate::pipeline::state::{Row, Visualization};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Rows fed to the label prompts
const LABEL_SAMPLE_ROWS: usize = 2;

/// Final output of the shaping step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FormattedData {
    Chart(ChartData),
    /// The fallback could not produce JSON; the raw text is kept for diagnosis
    Failed {
        error: String,
        #[serde(rename = "rawResponse")]
        raw_response: String,
    },
}

/// Chart-ready data for one family
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChartData {
    Bar(BarChart),
    Line(LineChart),
    Scatter(ScatterChart),
    /// Whatever structure the fallback produced
    Generic(Value),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarChart {
    pub labels: Vec<String>,
    pub values: Vec<BarSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarSeries {
    pub data: Vec<f64>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineChart {
    pub x_values: Vec<String>,
    pub y_values: Vec<LineSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_axis_label: Option<String>,
}

/// One line; `None` marks an x position the series has no value for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSeries {
    pub data: Vec<Option<f64>>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterChart {
    pub series: Vec<ScatterSeries>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterSeries {
    pub data: Vec<ScatterPoint>,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub x: f64,
    pub y: f64,
    pub id: usize,
}

/// Result rows as they reach the shaper
#[derive(Debug, Clone, PartialEq)]
pub enum RawRows {
    Rows(Vec<Row>),
    /// Result set still serialized as one JSON string
    Encoded(String),
}

impl RawRows {
    pub fn decode(&self) -> QueryChartResult<Vec<Row>> {
        match self {
            RawRows::Rows(rows) => Ok(rows.clone()),
            RawRows::Encoded(text) => decode_rows(Value::String(text.clone())),
        }
    }

    /// Text handed to the fallback prompt
    pub fn to_prompt_text(&self) -> String {
        match self {
            RawRows::Rows(rows) => serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string()),
            RawRows::Encoded(text) => text.clone(),
        }
    }
}

/// Everything the shaper needs for one result set
#[derive(Debug, Clone)]
pub struct ShapingInput<'a> {
    pub visualization: Visualization,
    pub rows: RawRows,
    pub question: &'a str,
    pub sql_query: &'a str,
}

/// Common width of all rows: 0 for an empty set, otherwise 2 or 3
pub fn row_width(rows: &[Row]) -> QueryChartResult<usize> {
    let Some(first) = rows.first() else {
        return Ok(0);
    };
    let width = first.len();
    if width != 2 && width != 3 {
        return Err(QueryChartError::UnexpectedShape(format!(
            "rows have {} columns, expected 2 or 3",
            width
        )));
    }
    if let Some(bad) = rows.iter().find(|row| row.len() != width) {
        return Err(QueryChartError::UnexpectedShape(format!(
            "mixed row widths: {} and {}",
            width,
            bad.len()
        )));
    }
    Ok(width)
}

/// Dispatches result sets to the shaper for their chart family
pub struct ResultShaper {
    generator: Arc<dyn TextGenerator>,
}

impl ResultShaper {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// Shape `input`, or `None` when no chart was chosen
    pub async fn shape(&self, input: &ShapingInput<'_>) -> Option<FormattedData> {
        if input.visualization == Visualization::None {
            return None;
        }

        let outcome = match input.rows.decode() {
            Ok(rows) => self.shape_dedicated(input, &rows).await,
            Err(e) => Some(Err(e)),
        };

        match outcome {
            Some(Ok(chart)) => Some(FormattedData::Chart(chart)),
            Some(Err(e)) => {
                warn!(
                    target: "shaping",
                    "Dedicated {} shaper rejected the rows, using fallback: {}",
                    input.visualization,
                    e
                );
                Some(fallback::shape_with_model(self.generator.as_ref(), input).await)
            }
            None => {
                debug!(target: "shaping", "No dedicated shaper for {}, using fallback", input.visualization);
                Some(fallback::shape_with_model(self.generator.as_ref(), input).await)
            }
        }
    }

    /// `None` when the family has no dedicated shaper
    async fn shape_dedicated(
        &self,
        input: &ShapingInput<'_>,
        rows: &[Row],
    ) -> Option<QueryChartResult<ChartData>> {
        let result = match input.visualization {
            Visualization::Bar | Visualization::HorizontalBar => self.shape_bar(input, rows).await,
            Visualization::Line => self.shape_line(input, rows).await,
            Visualization::Scatter => scatter::shape(rows).map(ChartData::Scatter),
            Visualization::Pie | Visualization::None => return None,
        };
        Some(result)
    }

    async fn shape_bar(&self, input: &ShapingInput<'_>, rows: &[Row]) -> QueryChartResult<ChartData> {
        let width = row_width(rows)?;
        let mut chart = bar::shape(rows)?;
        if width == 2 {
            let label = self.label(&SERIES_LABEL, input.question, rows).await;
            if let Some(series) = chart.values.first_mut() {
                series.label = label;
            }
        }
        Ok(ChartData::Bar(chart))
    }

    async fn shape_line(&self, input: &ShapingInput<'_>, rows: &[Row]) -> QueryChartResult<ChartData> {
        let width = row_width(rows)?;
        let mut chart = line::shape(rows)?;
        match width {
            2 => {
                let label = self.label(&SERIES_LABEL, input.question, rows).await;
                if let Some(series) = chart.y_values.first_mut() {
                    series.label = label;
                }
            }
            3 => chart.y_axis_label = Some(self.label(&Y_AXIS_LABEL, input.question, rows).await),
            _ => {}
        }
        Ok(ChartData::Line(chart))
    }

    /// Short model-generated label; failures degrade to an empty label
    async fn label(&self, prompt: &PromptTemplate, question: &str, rows: &[Row]) -> String {
        let sample = &rows[..rows.len().min(LABEL_SAMPLE_ROWS)];
        let values = PromptValues::new()
            .with("question", question)
            .with("data", serde_json::to_string(sample).unwrap_or_default());

        match self.generator.complete(prompt, &values).await {
            Ok(text) => clean_label(&text),
            Err(e) => {
                warn!(target: "shaping", "Could not get {} from model: {}", prompt.name, e);
                String::new()
            }
        }
    }
}

const MAX_LABEL_CHARS: usize = 80;

/// Strip whitespace, quotes and a `Label:` prefix from a one-line label
fn clean_label(text: &str) -> String {
    let line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    let line = match line.split_once(':') {
        Some((prefix, rest)) if prefix.to_lowercase().contains("label") => rest.trim(),
        _ => line,
    };
    let cleaned = line.trim_matches(|c| matches!(c, '"' | '\'' | '*' | '`')).trim();
    cleaned.chars().take(MAX_LABEL_CHARS).collect()
}

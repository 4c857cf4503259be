//! Line shaping
//!
//! Two columns give one series over the x values in row order. Three columns
//! give one series per inferred label, aligned on a shared x axis: every
//! series holds exactly one slot per distinct x value seen so far, `None`
//! where that series has no value.

use super::classify::{cell_number, cell_text, infer_row_roles};
use super::{row_width, LineChart, LineSeries};
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use serde_json::Value;
use std::collections::HashMap;

fn measure(value: &Value) -> QueryChartResult<f64> {
    cell_number(value).ok_or_else(|| {
        QueryChartError::UnexpectedShape(format!("line value is not numeric: {}", value))
    })
}

/// Fold state for aligned multi-series lines
#[derive(Debug, Default)]
pub struct LineAccumulator {
    x_values: Vec<String>,
    x_index: HashMap<String, usize>,
    series: Vec<LineSeries>,
    series_index: HashMap<String, usize>,
}

impl LineAccumulator {
    /// Start with every series known up front, in the given order
    pub fn with_labels(labels: impl IntoIterator<Item = String>) -> Self {
        let mut acc = Self::default();
        for label in labels {
            acc.series_slot(label);
        }
        acc
    }

    fn series_slot(&mut self, label: String) -> usize {
        if let Some(&index) = self.series_index.get(&label) {
            return index;
        }
        let index = self.series.len();
        self.series.push(LineSeries {
            data: vec![None; self.x_values.len()],
            label: label.clone(),
        });
        self.series_index.insert(label, index);
        index
    }

    fn x_slot(&mut self, x: String) -> usize {
        if let Some(&index) = self.x_index.get(&x) {
            return index;
        }
        let index = self.x_values.len();
        self.x_values.push(x.clone());
        self.x_index.insert(x, index);
        for series in &mut self.series {
            series.data.push(None);
        }
        index
    }

    /// Record `y` for `label` at `x`; a repeated `(label, x)` overwrites
    pub fn push(&mut self, label: String, x: String, y: f64) {
        let series = self.series_slot(label);
        let slot = self.x_slot(x);
        self.series[series].data[slot] = Some(y);
    }

    #[cfg(test)]
    pub(crate) fn x_values(&self) -> &[String] {
        &self.x_values
    }

    #[cfg(test)]
    pub(crate) fn series(&self) -> &[LineSeries] {
        &self.series
    }

    /// Every series has one slot per distinct x value
    #[cfg(test)]
    pub(crate) fn is_aligned(&self) -> bool {
        self.series
            .iter()
            .all(|s| s.data.len() == self.x_values.len())
    }

    pub fn finish(self) -> LineChart {
        LineChart {
            x_values: self.x_values,
            y_values: self.series,
            y_axis_label: None,
        }
    }
}

/// Shape rows for a line chart; labels from the model are attached by the caller
pub fn shape(rows: &[Row]) -> QueryChartResult<LineChart> {
    match row_width(rows)? {
        0 => Ok(LineChart {
            x_values: Vec::new(),
            y_values: Vec::new(),
            y_axis_label: None,
        }),
        2 => {
            let x_values = rows.iter().map(|row| cell_text(&row[0])).collect();
            let data = rows
                .iter()
                .map(|row| measure(&row[1]).map(Some))
                .collect::<QueryChartResult<Vec<_>>>()?;
            Ok(LineChart {
                x_values,
                y_values: vec![LineSeries {
                    data,
                    label: String::new(),
                }],
                y_axis_label: None,
            })
        }
        _ => {
            let roles = rows
                .iter()
                .map(|row| infer_row_roles(row))
                .collect::<QueryChartResult<Vec<_>>>()?;

            let mut labels: Vec<String> = Vec::new();
            for r in &roles {
                let label = cell_text(r.label);
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }

            let mut acc = LineAccumulator::with_labels(labels);
            for r in roles {
                acc.push(cell_text(r.label), cell_text(r.x), measure(r.y)?);
            }
            Ok(acc.finish())
        }
    }
}

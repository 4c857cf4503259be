//! Bar and horizontal bar shaping
//!
//! Two columns give one series: `[category, value]`. Three columns are read
//! positionally as `[entity, category, value]`: `labels` lists the distinct
//! categories and each entity gets one series holding its values in row
//! order. Entity series are not padded to `labels`, so positions in `data`
//! do not necessarily line up with positions in `labels`.

use super::classify::{cell_number, cell_text};
use super::{row_width, BarChart, BarSeries};
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use serde_json::Value;

fn measure(value: &Value) -> QueryChartResult<f64> {
    cell_number(value).ok_or_else(|| {
        QueryChartError::UnexpectedShape(format!("bar value is not numeric: {}", value))
    })
}

/// Distinct texts of one column, in order of first appearance
fn distinct(rows: &[Row], column: usize) -> Vec<String> {
    let mut seen = Vec::new();
    for row in rows {
        let text = cell_text(&row[column]);
        if !seen.contains(&text) {
            seen.push(text);
        }
    }
    seen
}

/// Shape rows for a bar chart; series labels are left empty for the caller
pub fn shape(rows: &[Row]) -> QueryChartResult<BarChart> {
    match row_width(rows)? {
        0 => Ok(BarChart {
            labels: Vec::new(),
            values: Vec::new(),
        }),
        2 => {
            let labels = rows.iter().map(|row| cell_text(&row[0])).collect();
            let data = rows
                .iter()
                .map(|row| measure(&row[1]))
                .collect::<QueryChartResult<Vec<_>>>()?;
            Ok(BarChart {
                labels,
                values: vec![BarSeries {
                    data,
                    label: String::new(),
                }],
            })
        }
        _ => {
            let labels = distinct(rows, 1);
            let values = distinct(rows, 0)
                .into_iter()
                .map(|entity| {
                    let data = rows
                        .iter()
                        .filter(|row| cell_text(&row[0]) == entity)
                        .map(|row| measure(&row[2]))
                        .collect::<QueryChartResult<Vec<_>>>()?;
                    Ok(BarSeries {
                        data,
                        label: entity,
                    })
                })
                .collect::<QueryChartResult<Vec<_>>>()?;
            Ok(BarChart { labels, values })
        }
    }
}

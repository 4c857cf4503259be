//! Scatter shaping
//!
//! Two columns give one "Data Points" series. Three columns are grouped by
//! inferred label into independent series; each series numbers its own
//! points from 1 and no alignment is done across series.

use super::classify::{cell_number, cell_text, infer_row_roles};
use super::{row_width, ScatterChart, ScatterPoint, ScatterSeries};
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use serde_json::Value;

const SINGLE_SERIES_LABEL: &str = "Data Points";

fn coordinate(value: &Value) -> QueryChartResult<f64> {
    cell_number(value).ok_or_else(|| {
        QueryChartError::UnexpectedShape(format!("scatter coordinate is not numeric: {}", value))
    })
}

pub fn shape(rows: &[Row]) -> QueryChartResult<ScatterChart> {
    match row_width(rows)? {
        0 => Ok(ScatterChart { series: Vec::new() }),
        2 => {
            let data = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    Ok(ScatterPoint {
                        x: coordinate(&row[0])?,
                        y: coordinate(&row[1])?,
                        id: i + 1,
                    })
                })
                .collect::<QueryChartResult<Vec<_>>>()?;
            Ok(ScatterChart {
                series: vec![ScatterSeries {
                    data,
                    label: SINGLE_SERIES_LABEL.to_string(),
                }],
            })
        }
        _ => {
            let mut series: Vec<ScatterSeries> = Vec::new();
            for row in rows {
                let roles = infer_row_roles(row)?;
                let label = cell_text(roles.label);
                let x = coordinate(roles.x)?;
                let y = coordinate(roles.y)?;

                let index = match series.iter().position(|s| s.label == label) {
                    Some(index) => index,
                    None => {
                        series.push(ScatterSeries {
                            data: Vec::new(),
                            label,
                        });
                        series.len() - 1
                    }
                };
                let points = &mut series[index].data;
                points.push(ScatterPoint {
                    x,
                    y,
                    id: points.len() + 1,
                });
            }
            Ok(ScatterChart { series })
        }
    }
}

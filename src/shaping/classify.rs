//! Column-role inference for untyped result rows
//!
//! Result rows carry no type metadata, so each cell is classified on its own
//! form. A cell is a `Label` (a categorical series key) when it is text that
//! does not parse as a number and contains no `/`. The `/` exclusion keeps
//! dates such as `01/02/2024` on the axis side.
//!
//! | cell                 | role    |
//! |----------------------|---------|
//! | `"Male"`             | Label   |
//! | `""`                 | Label   |
//! | `"2023-01"`          | Label   |
//! | `"12.5"`, `" 3 "`    | Measure |
//! | `"01/02/2024"`       | Measure |
//! | `"NaN"`, `"inf"`     | Label   |
//! | `10`, `true`, `null` | Measure |

use crate::error::{QueryChartError, QueryChartResult};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRole {
    Label,
    Measure,
}

/// Classify one cell by its own value only
pub fn classify_cell(value: &Value) -> CellRole {
    match value {
        Value::String(text) => {
            if text.contains('/') || parse_finite(text).is_some() {
                CellRole::Measure
            } else {
                CellRole::Label
            }
        }
        _ => CellRole::Measure,
    }
}

fn parse_finite(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Numeric value of a cell, if it has one
pub fn cell_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => parse_finite(text),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Text form of a cell for axis labels and series names
pub fn cell_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Roles of the three cells of a `[label, x, y]`-style row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowRoles<'a> {
    pub label: &'a Value,
    pub x: &'a Value,
    pub y: &'a Value,
}

/// Pick the label among the first two cells of a 3-column row
///
/// The second cell wins when it is a label, then the first; when neither
/// is, the second is used. The third cell is always the measure.
pub fn infer_row_roles(row: &[Value]) -> QueryChartResult<RowRoles<'_>> {
    let [a, b, c] = row else {
        return Err(QueryChartError::UnexpectedShape(format!(
            "expected 3 cells, got {}",
            row.len()
        )));
    };

    let label_first = classify_cell(b) != CellRole::Label && classify_cell(a) == CellRole::Label;
    let (label, x) = if label_first { (a, b) } else { (b, a) };
    Ok(RowRoles { label, x, y: c })
}

//! Dataset gateway
//!
//! Resolves an opaque dataset id to schema text and executes read queries
//! against it. Gateways hold no per-run state and may be shared freely.
//!
//! # Backends
//!
//! ```text
//! ┌──────────────────────────────┐
//! │       DatasetGateway         │
//! └──────────────┬───────────────┘
//!        ┌───────┴────────┬─────────────────┐
//! ┌──────▼──────┐  ┌──────▼──────┐  ┌───────▼───────┐
//! │ HttpGateway │  │SqliteGateway│  │InMemoryGateway│
//! │- get-schema │  │- local dir  │  │- tests        │
//! │- exec-query │  │- read-only  │  │- fixtures     │
//! └─────────────┘  └─────────────┘  └───────────────┘
//! ```

pub mod factory;
pub mod http;
pub mod mock;
pub mod sqlite;

pub use factory::GatewayFactory;
pub use http::HttpGateway;
pub use mock::InMemoryGateway;
pub use sqlite::SqliteGateway;

use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use async_trait::async_trait;
use serde_json::Value;

/// Schema and query access for uploaded datasets
#[async_trait]
pub trait DatasetGateway: Send + Sync {
    /// Human-readable schema text for the dataset
    ///
    /// Fails with `SchemaUnavailable` when the id is unknown.
    async fn get_schema(&self, dataset_id: &str) -> QueryChartResult<String>;

    /// Execute a read query and return positional rows
    ///
    /// Fails with `QueryExecution` carrying the engine message.
    async fn execute_query(&self, dataset_id: &str, sql: &str) -> QueryChartResult<Vec<Row>>;
}

/// Decode a result set that may arrive as JSON rows or as JSON text
///
/// Object rows are flattened in the order their keys appear in the body,
/// which is the column order of the query; scalars become one-cell rows.
pub fn decode_rows(value: Value) -> QueryChartResult<Vec<Row>> {
    match value {
        Value::String(text) => {
            let parsed: Value = serde_json::from_str(&text).map_err(|e| {
                QueryChartError::UnexpectedShape(format!("result text is not JSON: {}", e))
            })?;
            match parsed {
                Value::String(_) => Err(QueryChartError::UnexpectedShape(
                    "result text decodes to a string".to_string(),
                )),
                other => decode_rows(other),
            }
        }
        Value::Array(rows) => Ok(rows.into_iter().map(decode_row).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(QueryChartError::UnexpectedShape(format!(
            "expected a list of rows, got {}",
            other
        ))),
    }
}

fn decode_row(row: Value) -> Row {
    match row {
        Value::Array(cells) => cells,
        Value::Object(map) => map.into_iter().map(|(_, cell)| cell).collect(),
        scalar => vec![scalar],
    }
}

/// Quote an identifier with backticks, doubling embedded backticks
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_array_rows() {
        let rows = decode_rows(json!([["a", 1], ["b", 2]])).unwrap();
        assert_eq!(rows, vec![vec![json!("a"), json!(1)], vec![json!("b"), json!(2)]]);
    }

    #[test]
    fn test_decode_string_encoded_rows() {
        let rows = decode_rows(json!("[[\"Male\", 10]]")).unwrap();
        assert_eq!(rows, vec![vec![json!("Male"), json!(10)]]);
    }

    #[test]
    fn test_decode_rejects_bad_text() {
        assert!(decode_rows(json!("not json")).is_err());
        assert!(decode_rows(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_decode_object_rows_keep_column_order() {
        let body = r#"[{"region":"North","month":"2023-01","total":10}]"#;
        let rows = decode_rows(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(rows, vec![vec![json!("North"), json!("2023-01"), json!(10)]]);

        let rows = decode_rows(Value::String(body.to_string())).unwrap();
        assert_eq!(rows[0][0], json!("North"));
    }

    #[test]
    fn test_decode_null_is_empty() {
        assert!(decode_rows(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("artist name"), "`artist name`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }
}

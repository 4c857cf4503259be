use super::{quote_identifier, DatasetGateway};
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{Map, Number, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Number of example rows listed per table in schema text
const EXAMPLE_ROWS: usize = 3;

/// Gateway over a directory of `<dataset-id>.sqlite` files
///
/// Databases are opened read-only per call; rusqlite work runs on the
/// blocking pool.
pub struct SqliteGateway {
    data_dir: PathBuf,
}

impl SqliteGateway {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Map a dataset id to its database file
    pub fn dataset_path(&self, dataset_id: &str) -> QueryChartResult<PathBuf> {
        let valid = !dataset_id.is_empty()
            && dataset_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(QueryChartError::InvalidDatasetId(dataset_id.to_string()));
        }

        let path = self.data_dir.join(format!("{}.sqlite", dataset_id));
        if !path.is_file() {
            return Err(QueryChartError::DatasetNotFound(dataset_id.to_string()));
        }
        Ok(path)
    }
}

fn open_read_only(path: &Path) -> QueryChartResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    Ok(Connection::open_with_flags(path, flags)?)
}

fn cell_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(STANDARD.encode(bytes)),
    }
}

/// Run a query and collect positional rows
fn query_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let column_count = stmt.column_count();
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(column_count);
        for i in 0..column_count {
            cells.push(cell_to_json(row.get_ref(i)?));
        }
        out.push(cells);
    }
    Ok(out)
}

/// Schema text: each table's CREATE statement followed by a few example rows
fn describe_schema(conn: &Connection) -> rusqlite::Result<String> {
    let mut stmt = conn.prepare(
        "SELECT name, sql FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut sections = Vec::with_capacity(tables.len());
    for (name, create_sql) in tables {
        let mut section = format!(
            "Table: {}\nCREATE statement: {}\n",
            name,
            create_sql.unwrap_or_default()
        );

        let mut sample = conn.prepare(&format!(
            "SELECT * FROM {} LIMIT {}",
            quote_identifier(&name),
            EXAMPLE_ROWS
        ))?;
        let columns: Vec<String> = sample.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = sample.query([])?;

        section.push_str("\nExample rows:\n");
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, column) in columns.iter().enumerate() {
                object.insert(column.clone(), cell_to_json(row.get_ref(i)?));
            }
            section.push_str(&Value::Object(object).to_string());
            section.push('\n');
        }
        sections.push(section);
    }

    Ok(sections.join("\n"))
}

#[async_trait]
impl DatasetGateway for SqliteGateway {
    async fn get_schema(&self, dataset_id: &str) -> QueryChartResult<String> {
        let path = self
            .dataset_path(dataset_id)
            .map_err(|e| QueryChartError::SchemaUnavailable {
                dataset_id: dataset_id.to_string(),
                message: e.to_string(),
            })?;

        debug!(target: "gateway::sqlite", "Reading schema from {}", path.display());

        let id = dataset_id.to_string();
        tokio::task::spawn_blocking(move || {
            open_read_only(&path)
                .and_then(|conn| Ok(describe_schema(&conn)?))
                .map_err(|e| QueryChartError::SchemaUnavailable {
                    dataset_id: id,
                    message: e.to_string(),
                })
        })
        .await?
    }

    async fn execute_query(&self, dataset_id: &str, sql: &str) -> QueryChartResult<Vec<Row>> {
        let path = self.dataset_path(dataset_id)?;
        let sql = sql.to_string();

        let rows = tokio::task::spawn_blocking(move || {
            open_read_only(&path)
                .and_then(|conn| Ok(query_rows(&conn, &sql)?))
                .map_err(|e| match e {
                    QueryChartError::Sqlite(inner) => QueryChartError::QueryExecution(inner.to_string()),
                    other => other,
                })
        })
        .await??;

        info!(target: "gateway::sqlite", "Query on {} returned {} rows", dataset_id, rows.len());
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_dataset(dir: &TempDir, id: &str) {
        let conn = Connection::open(dir.path().join(format!("{}.sqlite", id))).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (`product name` TEXT, quantity INTEGER, price REAL, thumb BLOB);
             INSERT INTO sales VALUES ('Widget', 3, 2.5, x'0102');
             INSERT INTO sales VALUES ('Gadget', 5, 4.0, NULL);
             INSERT INTO sales VALUES ('Widget', 1, 2.5, NULL);
             INSERT INTO sales VALUES ('Doohickey', 7, 1.25, NULL);",
        )
        .unwrap();
    }

    #[test]
    fn test_dataset_id_validation() {
        let dir = TempDir::new().unwrap();
        let gateway = SqliteGateway::new(dir.path());

        assert!(matches!(
            gateway.dataset_path("../secret"),
            Err(QueryChartError::InvalidDatasetId(_))
        ));
        assert!(matches!(
            gateway.dataset_path(""),
            Err(QueryChartError::InvalidDatasetId(_))
        ));
        assert!(matches!(
            gateway.dataset_path("missing"),
            Err(QueryChartError::DatasetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_schema_lists_tables_and_examples() {
        let dir = TempDir::new().unwrap();
        create_dataset(&dir, "shop");
        let gateway = SqliteGateway::new(dir.path());

        let schema = gateway.get_schema("shop").await.unwrap();
        assert!(schema.contains("Table: sales"));
        assert!(schema.contains("CREATE statement: CREATE TABLE sales"));
        assert!(schema.contains("Example rows:"));
        assert!(schema.contains("\"product name\":\"Widget\""));
        assert_eq!(schema.matches("\"quantity\":").count(), EXAMPLE_ROWS);
    }

    #[tokio::test]
    async fn test_schema_unknown_dataset() {
        let dir = TempDir::new().unwrap();
        let gateway = SqliteGateway::new(dir.path());
        let result = gateway.get_schema("nope").await;
        assert!(matches!(result, Err(QueryChartError::SchemaUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_execute_query_positional_rows() {
        let dir = TempDir::new().unwrap();
        create_dataset(&dir, "shop");
        let gateway = SqliteGateway::new(dir.path());

        let rows = gateway
            .execute_query(
                "shop",
                "SELECT `product name`, SUM(quantity) AS total FROM sales GROUP BY `product name` ORDER BY total DESC",
            )
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![
                vec![json!("Doohickey"), json!(7)],
                vec![json!("Gadget"), json!(5)],
                vec![json!("Widget"), json!(4)],
            ]
        );
    }

    #[tokio::test]
    async fn test_blob_and_real_cells() {
        let dir = TempDir::new().unwrap();
        create_dataset(&dir, "shop");
        let gateway = SqliteGateway::new(dir.path());

        let rows = gateway
            .execute_query("shop", "SELECT price, thumb FROM sales LIMIT 1")
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![json!(2.5), json!("AQI=")]]);
    }

    #[tokio::test]
    async fn test_engine_error_is_surfaced() {
        let dir = TempDir::new().unwrap();
        create_dataset(&dir, "shop");
        let gateway = SqliteGateway::new(dir.path());

        let err = gateway
            .execute_query("shop", "SELECT * FROM users")
            .await
            .unwrap_err();
        match err {
            QueryChartError::QueryExecution(message) => assert!(message.contains("no such table")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_writes_are_rejected() {
        let dir = TempDir::new().unwrap();
        create_dataset(&dir, "shop");
        let gateway = SqliteGateway::new(dir.path());

        let result = gateway.execute_query("shop", "DELETE FROM sales").await;
        assert!(matches!(result, Err(QueryChartError::QueryExecution(_))));
    }
}

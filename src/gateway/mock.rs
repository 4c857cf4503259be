use super::DatasetGateway;
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// In-memory gateway for development and testing
///
/// Schemas are registered per dataset id and query results per exact SQL
/// text. Unregistered queries fail like an engine error would.
#[derive(Default)]
pub struct InMemoryGateway {
    schemas: HashMap<String, String>,
    results: HashMap<String, QueryChartResult<Vec<Row>>>,
    schema_calls: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, dataset_id: &str, schema: impl Into<String>) -> Self {
        self.schemas.insert(dataset_id.to_string(), schema.into());
        self
    }

    pub fn with_result(mut self, sql: &str, rows: Vec<Row>) -> Self {
        self.results.insert(sql.to_string(), Ok(rows));
        self
    }

    pub fn with_query_error(mut self, sql: &str, message: impl Into<String>) -> Self {
        self.results
            .insert(sql.to_string(), Err(QueryChartError::QueryExecution(message.into())));
        self
    }

    /// Number of schema fetches served
    pub fn schema_calls(&self) -> usize {
        self.schema_calls.load(Ordering::SeqCst)
    }

    /// Every SQL text executed, in order
    pub fn executed_queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl DatasetGateway for InMemoryGateway {
    async fn get_schema(&self, dataset_id: &str) -> QueryChartResult<String> {
        self.schema_calls.fetch_add(1, Ordering::SeqCst);
        self.schemas
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| QueryChartError::SchemaUnavailable {
                dataset_id: dataset_id.to_string(),
                message: "Database not found".to_string(),
            })
    }

    async fn execute_query(&self, dataset_id: &str, sql: &str) -> QueryChartResult<Vec<Row>> {
        if !self.schemas.contains_key(dataset_id) {
            return Err(QueryChartError::DatasetNotFound(dataset_id.to_string()));
        }

        self.queries
            .lock()
            .map_err(|_| QueryChartError::Internal("query log poisoned".into()))?
            .push(sql.to_string());

        match self.results.get(sql) {
            Some(Ok(rows)) => Ok(rows.clone()),
            Some(Err(QueryChartError::QueryExecution(message))) => {
                Err(QueryChartError::QueryExecution(message.clone()))
            }
            Some(Err(other)) => Err(QueryChartError::QueryExecution(other.to_string())),
            None => Err(QueryChartError::QueryExecution(format!(
                "no result registered for query: {}",
                sql
            ))),
        }
    }
}

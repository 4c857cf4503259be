use super::{decode_rows, DatasetGateway};
use crate::error::{QueryChartError, QueryChartResult};
use crate::pipeline::state::Row;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Gateway backed by the dataset service's HTTP API
///
/// - `GET {endpoint}/get-schema/{id}` returns `{"schema": "..."}`
/// - `POST {endpoint}/execute-query` with `{"uuid", "query"}` returns `{"results": [...]}`
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: url::Url,
}

#[derive(Deserialize)]
struct SchemaResponse {
    schema: String,
}

#[derive(Serialize)]
struct ExecuteQueryRequest<'a> {
    uuid: &'a str,
    query: &'a str,
}

#[derive(Deserialize)]
struct ExecuteQueryResponse {
    #[serde(default)]
    results: Value,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpGateway {
    pub fn new(endpoint_url: &str) -> QueryChartResult<Self> {
        let mut endpoint = url::Url::parse(endpoint_url)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    fn schema_url(&self, dataset_id: &str) -> QueryChartResult<url::Url> {
        let mut url = self.endpoint.join("get-schema/")?;
        url.path_segments_mut()
            .map_err(|_| QueryChartError::ConfigError("endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .push(dataset_id);
        Ok(url)
    }
}

/// Pull the service's `error` text out of a failure body, falling back to the raw body
fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl DatasetGateway for HttpGateway {
    async fn get_schema(&self, dataset_id: &str) -> QueryChartResult<String> {
        let url = self.schema_url(dataset_id)?;
        debug!(target: "gateway::http", "Fetching schema for dataset {} from {}", dataset_id, url);

        let unavailable = |message: String| QueryChartError::SchemaUnavailable {
            dataset_id: dataset_id.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| unavailable(e.to_string()))?;
        if !status.is_success() {
            warn!(target: "gateway::http", "Schema request for {} failed with HTTP {}", dataset_id, status);
            return Err(unavailable(error_message(status, &body)));
        }

        let parsed: SchemaResponse = serde_json::from_str(&body)
            .map_err(|e| unavailable(format!("invalid schema response: {}", e)))?;
        Ok(parsed.schema)
    }

    async fn execute_query(&self, dataset_id: &str, sql: &str) -> QueryChartResult<Vec<Row>> {
        let url = self.endpoint.join("execute-query")?;
        debug!(target: "gateway::http", "Executing query on dataset {}", dataset_id);

        let response = self
            .client
            .post(url)
            .json(&ExecuteQueryRequest {
                uuid: dataset_id,
                query: sql,
            })
            .send()
            .await
            .map_err(|e| QueryChartError::QueryExecution(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| QueryChartError::QueryExecution(e.to_string()))?;
        if !status.is_success() {
            return Err(QueryChartError::QueryExecution(error_message(status, &body)));
        }

        let parsed: ExecuteQueryResponse = serde_json::from_str(&body).map_err(|e| {
            QueryChartError::QueryExecution(format!("invalid query response: {}", e))
        })?;
        decode_rows(parsed.results)
    }
}

use thiserror::Error;

/// Central error type for the querychart crate
#[derive(Error, Debug)]
pub enum QueryChartError {
    // ============================================================================
    // Gateway Errors
    // ============================================================================
    #[error("Schema unavailable for dataset {dataset_id}: {message}")]
    SchemaUnavailable { dataset_id: String, message: String },

    #[error("Query execution failed: {0}")]
    QueryExecution(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Invalid dataset ID: {0}")]
    InvalidDatasetId(String),

    // ============================================================================
    // Text Generation Errors
    // ============================================================================
    #[error("Text generation failed: {0}")]
    Generation(String),

    #[error("Model returned an empty completion")]
    EmptyCompletion,

    #[error("Malformed model response in {stage}: {message}")]
    MalformedModelResponse { stage: String, message: String },

    #[error("Missing prompt value: {0}")]
    MissingPromptValue(String),

    // ============================================================================
    // Pipeline Errors
    // ============================================================================
    #[error("Invalid pipeline graph: {0}")]
    InvalidGraph(String),

    #[error("Event channel closed")]
    EventChannelClosed,

    // ============================================================================
    // Shaping Errors
    // ============================================================================
    #[error("Unexpected result shape: {0}")]
    UnexpectedShape(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueryChartError {
    /// Whether this error ends the run instead of being recorded as data.
    ///
    /// Only structured model output that cannot be parsed is fatal; upstream
    /// unavailability and transport failures are captured into state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueryChartError::MalformedModelResponse { .. })
    }

    pub fn malformed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        QueryChartError::MalformedModelResponse {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

// Tokio join errors only surface from blocking gateway work
impl From<tokio::task::JoinError> for QueryChartError {
    fn from(err: tokio::task::JoinError) -> Self {
        QueryChartError::Internal(format!("Background task failed: {}", err))
    }
}

impl From<url::ParseError> for QueryChartError {
    fn from(err: url::ParseError) -> Self {
        QueryChartError::ConfigError(format!("Invalid URL: {}", err))
    }
}

impl From<QueryChartError> for String {
    fn from(error: QueryChartError) -> Self {
        error.to_string()
    }
}

// Helper type alias for Results
pub type QueryChartResult<T> = Result<T, QueryChartError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryChartError::QueryExecution("no such table: users".to_string());
        assert_eq!(err.to_string(), "Query execution failed: no such table: users");
    }

    #[test]
    fn test_schema_unavailable_display() {
        let err = QueryChartError::SchemaUnavailable {
            dataset_id: "abc".to_string(),
            message: "Database not found".to_string(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("Database not found"));
    }

    #[test]
    fn test_only_malformed_responses_are_fatal() {
        assert!(QueryChartError::malformed("Parse Question", "expected value").is_fatal());
        assert!(!QueryChartError::QueryExecution("boom".into()).is_fatal());
        assert!(!QueryChartError::Generation("timeout".into()).is_fatal());
        assert!(!QueryChartError::EmptyCompletion.is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QueryChartError = io_err.into();
        assert!(matches!(err, QueryChartError::Io(_)));
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = QueryChartError::DatasetNotFound("1234".to_string());
        let s: String = err.into();
        assert_eq!(s, "Dataset not found: 1234");
    }
}

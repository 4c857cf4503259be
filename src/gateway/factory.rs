//! Gateway factory
//!
//! Picks the gateway backend named by configuration so callers only ever
//! hold a `dyn DatasetGateway`.

use super::{DatasetGateway, HttpGateway, SqliteGateway};
use crate::config::GatewayConfig;
use crate::error::{QueryChartError, QueryChartResult};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub struct GatewayFactory;

impl GatewayFactory {
    /// Create an HTTP gateway for the dataset service at `endpoint_url`
    pub fn create_http_gateway(endpoint_url: &str) -> QueryChartResult<Arc<dyn DatasetGateway>> {
        Ok(Arc::new(HttpGateway::new(endpoint_url)?))
    }

    /// Create a gateway over a local directory of SQLite datasets
    pub fn create_sqlite_gateway(data_dir: PathBuf) -> QueryChartResult<Arc<dyn DatasetGateway>> {
        if !data_dir.is_dir() {
            return Err(QueryChartError::ConfigError(format!(
                "Dataset directory does not exist: {}",
                data_dir.display()
            )));
        }
        Ok(Arc::new(SqliteGateway::new(data_dir)))
    }

    /// Create the gateway selected by configuration
    pub fn from_config(config: &GatewayConfig) -> QueryChartResult<Arc<dyn DatasetGateway>> {
        match config {
            GatewayConfig::Http { endpoint_url } => {
                info!(target: "gateway", "Using dataset service at {}", endpoint_url);
                Self::create_http_gateway(endpoint_url)
            }
            GatewayConfig::Sqlite { data_dir } => {
                info!(target: "gateway", "Using local datasets in {}", data_dir.display());
                Self::create_sqlite_gateway(data_dir.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_http_from_config() {
        let config = GatewayConfig::Http {
            endpoint_url: "http://localhost:3001".into(),
        };
        assert!(GatewayFactory::from_config(&config).is_ok());
    }

    #[test]
    fn test_sqlite_from_config() {
        let dir = TempDir::new().unwrap();
        let config = GatewayConfig::Sqlite {
            data_dir: dir.path().to_path_buf(),
        };
        assert!(GatewayFactory::from_config(&config).is_ok());
    }

    #[test]
    fn test_sqlite_missing_dir() {
        let config = GatewayConfig::Sqlite {
            data_dir: PathBuf::from("/definitely/not/here"),
        };
        assert!(matches!(
            GatewayFactory::from_config(&config),
            Err(QueryChartError::ConfigError(_))
        ));
    }
}

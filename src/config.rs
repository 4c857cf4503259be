use crate::error::{QueryChartError, QueryChartResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_DB_ENDPOINT: &str = "http://localhost:3001";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Where datasets are resolved
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Text generation endpoint
    #[serde(default)]
    pub llm: LlmConfig,

    /// Default tracing filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Dataset gateway backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GatewayConfig {
    /// Remote dataset service exposing `get-schema` / `execute-query`
    Http { endpoint_url: String },

    /// Local directory of `<dataset-id>.sqlite` files
    Sqlite { data_dir: PathBuf },
}

/// OpenAI-compatible chat completion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// API key; never serialized back out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub temperature: f32,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig::Http {
            endpoint_url: DEFAULT_DB_ENDPOINT.to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            temperature: 0.0,
        }
    }
}

impl AppConfig {
    /// Build configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// `QUERYCHART_DATA_DIR` selects the local SQLite backend and takes
    /// precedence over `DB_ENDPOINT_URL`.
    pub fn from_env() -> QueryChartResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> QueryChartResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let gateway = match lookup("QUERYCHART_DATA_DIR") {
            Some(dir) if !dir.trim().is_empty() => GatewayConfig::Sqlite {
                data_dir: PathBuf::from(dir),
            },
            _ => GatewayConfig::Http {
                endpoint_url: lookup("DB_ENDPOINT_URL")
                    .unwrap_or_else(|| DEFAULT_DB_ENDPOINT.to_string()),
            },
        };

        let temperature = match lookup("LLM_TEMPERATURE") {
            Some(raw) => raw.trim().parse::<f32>().map_err(|_| {
                QueryChartError::ConfigError(format!("LLM_TEMPERATURE is not a number: {}", raw))
            })?,
            None => 0.0,
        };

        let llm = LlmConfig {
            base_url: lookup("LLM_BASE_URL").unwrap_or_else(default_llm_base_url),
            model: lookup("LLM_MODEL").unwrap_or_else(default_llm_model),
            api_key: lookup("LLM_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .filter(|key| !key.is_empty()),
            temperature,
        };

        let config = Self {
            gateway,
            llm,
            log_level: lookup("QUERYCHART_LOG").unwrap_or_else(default_log_level),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> QueryChartResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            QueryChartError::ConfigError(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that would otherwise fail later at request time
    pub fn validate(&self) -> QueryChartResult<()> {
        if let GatewayConfig::Http { endpoint_url } = &self.gateway {
            url::Url::parse(endpoint_url)?;
        }
        url::Url::parse(&self.llm.base_url)?;
        if self.llm.model.trim().is_empty() {
            return Err(QueryChartError::ConfigError("LLM model must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(QueryChartError::ConfigError(format!(
                "LLM temperature out of range: {}",
                self.llm.temperature
            )));
        }
        Ok(())
    }
}

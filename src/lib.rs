//! Answer natural-language questions over tabular datasets.
//!
//! A question runs through a fixed stage graph: the model classifies it
//! against the dataset schema, writes and repairs a SQL query, the query runs
//! through a [`gateway::DatasetGateway`], and the rows are summarized in one
//! line and shaped for the chart family the model recommends.

pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod llm;
pub mod logger;
pub mod pipeline;
pub mod shaping;
pub mod state_machine;

pub use config::AppConfig;
pub use error::{QueryChartError, QueryChartResult};
pub use events::{EventSink, PipelineEvent};
pub use gateway::{DatasetGateway, GatewayFactory};
pub use llm::TextGenerator;
pub use pipeline::{Pipeline, PipelineResult, PipelineState};
pub use shaping::FormattedData;
pub use state_machine::Node;

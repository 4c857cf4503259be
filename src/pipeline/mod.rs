//! Question pipeline: from a natural-language question to an answer and chart data
//!
//! Each stage reads the accumulated state and returns a partial update. The
//! executor walks the stage graph, merges updates (scalar fields replace,
//! accumulator fields append) and reports every stage as an event.
//!
//! # Example
//! ```ignore
//! use querychart::gateway::GatewayFactory;
//! use querychart::llm::OpenAiClient;
//! use querychart::pipeline::Pipeline;
//! use std::sync::Arc;
//!
//! let gateway = GatewayFactory::create_sqlite_gateway("./datasets".into())?;
//! let generator = Arc::new(OpenAiClient::new(&config.llm)?);
//! let pipeline = Pipeline::standard(gateway, generator)?;
//!
//! let result = pipeline.ask("Which product sold the most units?", "sales").await;
//! println!("{}", result.final_state.answer().concatenated());
//! ```

pub mod core;
pub mod executor;
pub mod stages;
pub mod state;

// Re-export main types
pub use core::{PipelineResult, PipelineStage, StageResult};
pub use executor::{Pipeline, PipelineBuilder, STANDARD_PIPELINE_NAME};
pub use state::{
    AppendLog, ParsedQuestion, PipelineState, QueryResults, RelevantTable, Row, SqlQuery,
    StateSnapshot, StateUpdate, Visualization, NOT_RELEVANT,
};

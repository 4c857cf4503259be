//! Text generation capability
//!
//! The pipeline treats the language model as an opaque capability: given a
//! structured prompt and named values it returns raw text. Callers parse and
//! validate that text themselves; the client never retries.

pub mod json;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod prompts;

pub use mock::ScriptedGenerator;
pub use openai::OpenAiClient;
pub use prompt::{ChatMessage, PromptMessage, PromptTemplate, PromptValues, Role};

use crate::error::QueryChartResult;
use async_trait::async_trait;

/// Language model completion
///
/// Implementations must be safe to share across concurrent pipeline runs.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Render `prompt` with `values` and return the raw completion text
    async fn complete(
        &self,
        prompt: &PromptTemplate,
        values: &PromptValues,
    ) -> QueryChartResult<String>;
}

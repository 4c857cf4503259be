use super::prompt::{PromptTemplate, PromptValues};
use super::TextGenerator;
use crate::error::{QueryChartError, QueryChartResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Scripted text generator for development and testing
///
/// Responses are queued per prompt name and handed out in order. Every call
/// is recorded so tests can assert which prompts ran and with what values.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<HashMap<String, VecDeque<QueryChartResult<String>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

/// One recorded completion request
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub values: PromptValues,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the prompt with this name
    pub fn respond(self, prompt: &str, response: impl Into<String>) -> Self {
        self.push(prompt, Ok(response.into()));
        self
    }

    /// Queue a failure for the prompt with this name
    pub fn fail(self, prompt: &str, message: impl Into<String>) -> Self {
        self.push(prompt, Err(QueryChartError::Generation(message.into())));
        self
    }

    fn push(&self, prompt: &str, response: QueryChartResult<String>) {
        if let Ok(mut responses) = self.responses.lock() {
            responses
                .entry(prompt.to_string())
                .or_default()
                .push_back(response);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of calls made for the prompt with this name
    pub fn call_count(&self, prompt: &str) -> usize {
        self.calls().iter().filter(|c| c.prompt == prompt).count()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(
        &self,
        prompt: &PromptTemplate,
        values: &PromptValues,
    ) -> QueryChartResult<String> {
        // Render anyway so missing values surface like they would for a real client
        prompt.render(values)?;

        self.calls
            .lock()
            .map_err(|_| QueryChartError::Internal("generator call log poisoned".into()))?
            .push(RecordedCall {
                prompt: prompt.name.to_string(),
                values: values.clone(),
            });

        let mut responses = self
            .responses
            .lock()
            .map_err(|_| QueryChartError::Internal("generator script poisoned".into()))?;

        responses
            .get_mut(prompt.name)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| {
                Err(QueryChartError::Generation(format!(
                    "No scripted response for prompt '{}'",
                    prompt.name
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::prompts::FORMAT_RESULTS;

    fn values() -> PromptValues {
        PromptValues::new()
            .with("question", "q")
            .with("results", "[]")
    }

    #[tokio::test]
    async fn test_responses_in_order() {
        let generator = ScriptedGenerator::new()
            .respond("format_results", "first")
            .respond("format_results", "second");

        assert_eq!(generator.complete(&FORMAT_RESULTS, &values()).await.unwrap(), "first");
        assert_eq!(generator.complete(&FORMAT_RESULTS, &values()).await.unwrap(), "second");
        assert!(generator.complete(&FORMAT_RESULTS, &values()).await.is_err());
        assert_eq!(generator.call_count("format_results"), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let generator = ScriptedGenerator::new().fail("format_results", "rate limited");
        let result = generator.complete(&FORMAT_RESULTS, &values()).await;
        assert!(matches!(result, Err(QueryChartError::Generation(_))));
    }

    #[tokio::test]
    async fn test_missing_values_rejected() {
        let generator = ScriptedGenerator::new().respond("format_results", "x");
        let result = generator
            .complete(&FORMAT_RESULTS, &PromptValues::new().with("question", "q"))
            .await;
        assert!(matches!(result, Err(QueryChartError::MissingPromptValue(_))));
        assert!(generator.calls().is_empty());
    }
}

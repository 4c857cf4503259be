use super::prompt::{ChatMessage, PromptTemplate, PromptValues};
use super::TextGenerator;
use crate::config::LlmConfig;
use crate::error::{QueryChartError, QueryChartResult};
use crate::logger::truncate_for_log;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Client for OpenAI-compatible `/chat/completions` endpoints
pub struct OpenAiClient {
    client: reqwest::Client,
    endpoint: url::Url,
    model: String,
    api_key: Option<String>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Create a client from configuration
    pub fn new(config: &LlmConfig) -> QueryChartResult<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: completions_url(&config.base_url)?,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

fn completions_url(base_url: &str) -> QueryChartResult<url::Url> {
    // Keep any path prefix such as `/v1` by forcing a trailing slash before joining
    let mut base = url::Url::parse(base_url)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    Ok(base.join("chat/completions")?)
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn complete(
        &self,
        prompt: &PromptTemplate,
        values: &PromptValues,
    ) -> QueryChartResult<String> {
        let messages = prompt.render(values)?;
        let payload = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
        };

        debug!(
            target: "llm::openai",
            "Sending prompt '{}' to {} (model: {}, messages: {})",
            prompt.name,
            self.endpoint,
            self.model,
            messages.len()
        );

        let mut request = self.client.post(self.endpoint.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| QueryChartError::Generation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(
                target: "llm::openai",
                "Completion for '{}' failed with HTTP {}: {}",
                prompt.name,
                status,
                truncate_for_log(&body, 300)
            );
            return Err(QueryChartError::Generation(format!(
                "HTTP {}: {}",
                status,
                truncate_for_log(&body, 300)
            )));
        }

        let data: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| QueryChartError::Generation(format!("Invalid response body: {}", e)))?;

        let text = data
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(QueryChartError::EmptyCompletion);
        }

        debug!(
            target: "llm::openai",
            "Completion for '{}' received ({} chars)",
            prompt.name,
            text.len()
        );

        Ok(text)
    }
}

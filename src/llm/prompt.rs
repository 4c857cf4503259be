use crate::error::{QueryChartError, QueryChartResult};
use serde::Serialize;
use std::collections::BTreeMap;

/// Speaker of one prompt message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Message template with `{name}` placeholders
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub template: &'static str,
}

impl PromptMessage {
    pub const fn system(template: &'static str) -> Self {
        Self {
            role: Role::System,
            template,
        }
    }

    pub const fn user(template: &'static str) -> Self {
        Self {
            role: Role::User,
            template,
        }
    }
}

/// Structured prompt: role-tagged messages plus a name used in logs and mocks
///
/// `{{` and `}}` render as literal braces, so JSON examples can be embedded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub messages: &'static [PromptMessage],
}

/// Rendered message ready for a chat completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Named substitution values for a prompt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptValues {
    values: BTreeMap<String, String>,
}

impl PromptValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl PromptTemplate {
    /// Substitute values into every message
    pub fn render(&self, values: &PromptValues) -> QueryChartResult<Vec<ChatMessage>> {
        self.messages
            .iter()
            .map(|message| {
                Ok(ChatMessage {
                    role: message.role,
                    content: render_template(message.template, values)?,
                })
            })
            .collect()
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn render_template(template: &str, values: &PromptValues) -> QueryChartResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail[1..].find('}') {
                Some(end) if is_placeholder_name(&tail[1..1 + end]) => {
                    let name = &tail[1..1 + end];
                    let value = values
                        .get(name)
                        .ok_or_else(|| QueryChartError::MissingPromptValue(name.to_string()))?;
                    out.push_str(value);
                    rest = &tail[end + 2..];
                }
                _ => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }

    out.push_str(rest);
    Ok(out)
}

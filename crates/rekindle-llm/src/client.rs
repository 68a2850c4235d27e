use async_trait::async_trait;
use rekindle_common::{Result, Role};
use serde::{Deserialize, Serialize};

/// Trait for completion backends. The engine only ever needs free text back;
/// structured outputs are parsed from it downstream.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Backend identifier (e.g. "openai").
    fn provider_id(&self) -> &str;

    /// Send a completion request and return the raw completion text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl CompletionRequest {
    /// A single-shot user prompt with no history, the analysis-call shape.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            messages: vec![PromptMessage {
                role: ChatRole::User,
                content: text.into(),
            }],
            max_tokens: None,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl From<Role> for ChatRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => Self::User,
            Role::Assistant => Self::Assistant,
        }
    }
}

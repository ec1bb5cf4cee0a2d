//! Seams to the model providers.
//!
//! The orchestrator never performs network I/O itself. It talks to models through
//! [`LlmClient`] and asks a [`ClientFactory`] to build one client per role.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use triad_core::Message;

use crate::config::ProviderConfig;
use crate::error::Result;

/// Per-request knobs forwarded to the provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub message: Message,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
}

impl ChatResponse {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChatChoice {
                message: Message::assistant(text),
            }],
        }
    }

    /// Content of the first choice, empty when the provider returned none.
    pub fn content(&self) -> &str {
        self.choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or_default()
    }
}

/// A chat-capable model connection bound to one provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Switch the model used for subsequent requests.
    fn set_model(&self, model: &str);

    fn current_model(&self) -> String;

    /// Context window in tokens, 0 when unknown.
    fn context_size(&self) -> usize;

    /// Drop any conversation state the client keeps between calls.
    async fn clear_context(&self) -> Result<()>;

    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<ChatResponse>;
}

/// Builds concrete clients for the router.
pub trait ClientFactory: Send + Sync {
    fn create_client(&self, provider: &ProviderConfig, model: &str) -> Result<Arc<dyn LlmClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&ProviderConfig, &str) -> Result<Arc<dyn LlmClient>> + Send + Sync,
{
    fn create_client(&self, provider: &ProviderConfig, model: &str) -> Result<Arc<dyn LlmClient>> {
        self(provider, model)
    }
}

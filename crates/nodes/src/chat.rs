//! Data types exchanged with the language-model collaborator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// `system`, `user`, `assistant`, ...
    #[serde(default = "default_role")]
    pub role: String,
    /// Optional participant name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Message text. May contain templates until the engine resolves them.
    #[serde(default)]
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

impl Prompt {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            name: None,
            content: content.into(),
        }
    }
}

/// Request payload for one streaming chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub prompts: Vec<Prompt>,
    /// Provider-specific options, passed through untouched.
    #[serde(default)]
    pub options: Value,
}

/// An incremental piece of streamed text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChunk {
    pub delta: String,
}

/// Terminal status of a streaming chat call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatStatus {
    /// Any body bytes the client captured that were not delivered as chunks
    /// (typically an error payload from the provider).
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

pub mod embedding;
pub mod inference;
pub mod registry;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use crate::errors::AppError;

// Re-export registry for easier access
pub use registry::{ListProvidersEntry, ModelPolicy, ProviderRegistry};

/// Streaming response type alias for provider implementations
///
/// Each item is one chunk of generated text.
pub type StreamResponse = BoxStream<'static, Result<String, AppError>>;

/// Author of a message handed to a language model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

/// Message structure for model conversations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseMessage {
    pub role: Role,
    pub content: String,
}

impl BaseMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self { role: Role::Human, content: content.into() }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self { role: Role::Ai, content: content.into() }
    }
}

/// A form field the UI renders when configuring a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderField {
    #[serde(rename = "type")]
    pub field_type: String,
    pub key: String,
    pub label: String,
    pub format: String,
}

/// Static description of a provider
#[derive(Debug, Clone, Default)]
pub struct ProviderInfo {
    pub id: String,
    pub name: String,
    pub models: Vec<String>,
    pub chat_models: Vec<String>,
    pub completion_models: Vec<String>,
    pub help: Option<String>,
    pub auth_strategy: Option<serde_json::Value>,
    pub registry: bool,
    pub fields: Vec<ProviderField>,
    pub model_id_label: Option<String>,
    /// Slash commands (with leading `/`) this provider cannot serve.
    pub unsupported_slash_commands: Vec<String>,
}

/// Language model provider trait
///
/// One provider serves every model in its catalog; callers name the model
/// by its provider-local id.
#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Run a non-streaming completion and return the generated text.
    async fn invoke(&self, model_id: &str, messages: &[BaseMessage]) -> Result<String, AppError>;

    /// Run a streaming completion.
    async fn stream(&self, model_id: &str, messages: &[BaseMessage]) -> Result<StreamResponse, AppError>;
}

/// Embedding model provider trait
#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    fn info(&self) -> ProviderInfo;

    /// Embed document passages, one vector per text, in input order.
    async fn embed_documents(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError>;

    /// Embed a search query.
    async fn embed_query(&self, model_id: &str, text: &str) -> Result<Vec<f32>, AppError>;
}

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use copilot_server::{
    AppError, AppState, Config,
    providers::{
        BaseMessage, EmbeddingsProvider, LanguageModelProvider, ProviderInfo, ProviderRegistry, StreamResponse,
    },
    usage::{CopilotEvent, EventSink, UsageTracker},
};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;

/// Language model answering with canned chunks and recording its prompts
pub struct FakeLanguageModel {
    pub id: String,
    pub name: String,
    pub models: Vec<String>,
    pub chunks: Vec<String>,
    pub unsupported_slash_commands: Vec<String>,
    pub prompts: Mutex<Vec<Vec<BaseMessage>>>,
}

impl FakeLanguageModel {
    pub fn new(id: &str, models: &[&str], chunks: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: format!("{} provider", id),
            models: models.iter().map(|m| m.to_string()).collect(),
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            unsupported_slash_commands: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<Vec<BaseMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModelProvider for FakeLanguageModel {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            models: self.models.clone(),
            chat_models: self.models.clone(),
            completion_models: Vec::new(),
            unsupported_slash_commands: self.unsupported_slash_commands.clone(),
            ..ProviderInfo::default()
        }
    }

    async fn invoke(&self, _model_id: &str, messages: &[BaseMessage]) -> Result<String, AppError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        Ok(self.chunks.concat())
    }

    async fn stream(&self, _model_id: &str, messages: &[BaseMessage]) -> Result<StreamResponse, AppError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        let chunks: Vec<Result<String, AppError>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Language model whose calls fail; streams break after one chunk
pub struct FailingLanguageModel {
    pub id: String,
    pub models: Vec<String>,
}

impl FailingLanguageModel {
    pub fn new(id: &str, models: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
        }
    }
}

fn upstream_error() -> AppError {
    AppError::model_response("not_ok_status", serde_json::json!({ "response_http_status": 500 }))
}

#[async_trait]
impl LanguageModelProvider for FailingLanguageModel {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: format!("{} provider", self.id),
            models: self.models.clone(),
            ..ProviderInfo::default()
        }
    }

    async fn invoke(&self, _model_id: &str, _messages: &[BaseMessage]) -> Result<String, AppError> {
        Err(upstream_error())
    }

    async fn stream(&self, _model_id: &str, _messages: &[BaseMessage]) -> Result<StreamResponse, AppError> {
        let items = vec![Ok("par".to_string()), Err(upstream_error())];
        Ok(Box::pin(futures::stream::iter(items)))
    }
}

/// Embeddings where each text maps to `[1.0, len]`; records the size of
/// every document batch
pub struct FakeEmbeddings {
    pub id: String,
    pub models: Vec<String>,
    /// Make `embed_query` fail.
    pub fail_queries: bool,
    pub batches: Mutex<Vec<usize>>,
}

impl FakeEmbeddings {
    pub fn new(id: &str, models: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            models: models.iter().map(|m| m.to_string()).collect(),
            fail_queries: false,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmbeddingsProvider for FakeEmbeddings {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: self.id.clone(),
            name: format!("{} embeddings", self.id),
            models: self.models.clone(),
            ..ProviderInfo::default()
        }
    }

    async fn embed_documents(&self, _model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        self.batches.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
    }

    async fn embed_query(&self, _model_id: &str, text: &str) -> Result<Vec<f32>, AppError> {
        if self.fail_queries {
            return Err(upstream_error());
        }
        Ok(vec![1.0, text.len() as f32])
    }
}

/// Usage sink keeping every event it receives
#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<CopilotEvent>>);

impl RecordingSink {
    pub fn events(&self) -> Vec<CopilotEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn send_copilot_event(&self, event: &CopilotEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

pub fn registry_with(
    lm: Arc<FakeLanguageModel>,
    em: Option<Arc<FakeEmbeddings>>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new_empty();
    registry.register_language_model(lm);
    if let Some(em) = em {
        registry.register_embedding_model(em);
    }
    registry
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.chat.user_name = Some("tester".to_string());
    config
}

pub fn test_state(config: Config, registry: ProviderRegistry) -> AppState {
    AppState::with_registry(config, registry).unwrap()
}

pub fn test_state_with_sink(config: Config, registry: ProviderRegistry, sink: Arc<RecordingSink>) -> AppState {
    let usage = UsageTracker::with_engine_id(Some("engine-test".to_string()), sink);
    AppState::with_registry_and_usage(config, registry, usage).unwrap()
}

/// Drain every message currently queued for a client
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut messages = Vec::new();
    while let Ok(text) = rx.try_recv() {
        messages.push(serde_json::from_str(&text).unwrap());
    }
    messages
}

pub fn types(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m["type"].as_str().unwrap_or_default().to_string())
        .collect()
}

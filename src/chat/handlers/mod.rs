pub mod ask;
pub mod clear;
pub mod default;
pub mod learn;

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use futures::StreamExt;

use crate::{
    chat::{
        hub::{ChatHub, ChatServices},
        model::*,
    },
    errors::AppResult,
    providers::StreamResponse,
};

pub use ask::AskChatHandler;
pub use clear::ClearChatHandler;
pub use default::DefaultChatHandler;
pub use learn::LearnChatHandler;

pub const DEFAULT_HANDLER_ID: &str = "default";

pub const NO_LANGUAGE_MODEL_REPLY: &str =
    "Sorry, no language model is selected. Please choose a language model in the chat settings and try again.";

/// How messages reach a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingType {
    /// Messages that are not slash commands.
    Default,
    SlashCommand { slash_id: String },
}

impl RoutingType {
    pub fn slash_command(slash_id: &str) -> Self {
        RoutingType::SlashCommand { slash_id: slash_id.to_string() }
    }

    pub fn routing_method(&self) -> &'static str {
        match self {
            RoutingType::Default => "default",
            RoutingType::SlashCommand { .. } => "slash_command",
        }
    }

    /// Key a handler is registered under in the hub.
    pub fn route_key(&self) -> String {
        match self {
            RoutingType::Default => DEFAULT_HANDLER_ID.to_string(),
            RoutingType::SlashCommand { slash_id } => format!("/{}", slash_id),
        }
    }
}

#[async_trait]
pub trait ChatHandler: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn help(&self) -> &'static str;
    fn routing_type(&self) -> RoutingType;

    /// Whether the handler needs the selected language model.
    fn uses_llm(&self) -> bool {
        true
    }

    async fn process_message(&self, ctx: &ChatContext, message: &HumanChatMessage) -> AppResult<()>;

    /// Drop any conversation memory the handler keeps.
    fn clear_memory(&self) {}

    /// Run `process_message`, turning failures into a chat reply.
    async fn on_message(&self, ctx: &ChatContext, message: &HumanChatMessage) {
        if self.uses_llm() && ctx.services().config_manager.lm_provider().await.is_none() {
            ctx.reply(NO_LANGUAGE_MODEL_REPLY, message).await;
            return;
        }

        if let Err(e) = self.process_message(ctx, message).await {
            tracing::error!(handler = self.id(), error = %e, "Chat handler failed");
            ctx.reply(
                format!("Sorry, an error occurred. Details below:\n\n```\n{}\n```", e),
                message,
            )
            .await;
        }
    }
}

/// What a handler sees of the hub while processing one message
pub struct ChatContext {
    hub: Arc<ChatHub>,
}

impl ChatContext {
    pub fn new(hub: Arc<ChatHub>) -> Self {
        Self { hub }
    }

    pub fn hub(&self) -> &Arc<ChatHub> {
        &self.hub
    }

    pub fn services(&self) -> &ChatServices {
        self.hub.services()
    }

    pub async fn reply(&self, body: impl Into<String>, human: &HumanChatMessage) {
        let message = AgentChatMessage {
            id: new_message_id(),
            time: now_seconds(),
            body: body.into(),
            reply_to: human.id.clone(),
            persona: Persona::default(),
        };
        self.hub.broadcast(Message::Agent(message)).await;
    }

    /// Show a pending indicator; returns its id for `close_pending`.
    pub async fn pending(&self, body: impl Into<String>, human: &HumanChatMessage) -> String {
        let id = new_message_id();
        let message = PendingMessage {
            id: id.clone(),
            time: now_seconds(),
            body: body.into(),
            reply_to: human.id.clone(),
            persona: Persona::default(),
            ellipsis: true,
        };
        self.hub.broadcast(Message::Pending(message)).await;
        id
    }

    pub async fn close_pending(&self, id: &str) {
        self.hub
            .broadcast(Message::ClosePending(ClosePendingMessage { id: id.to_string() }))
            .await;
    }

    /// Relay a model stream as one `agent-stream` message plus chunks and
    /// return the full text.
    ///
    /// The stream is always closed with a `stream_complete` chunk, also
    /// when the model fails midway.
    pub async fn stream_reply(&self, mut stream: StreamResponse, human: &HumanChatMessage) -> AppResult<String> {
        let stream_id = new_message_id();
        self.hub
            .broadcast(Message::AgentStream(AgentStreamMessage {
                id: stream_id.clone(),
                time: now_seconds(),
                body: String::new(),
                reply_to: human.id.clone(),
                persona: Persona::default(),
                complete: false,
            }))
            .await;

        let mut reply = String::new();
        let mut failure = None;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(content) => {
                    reply.push_str(&content);
                    self.send_chunk(&stream_id, content, false).await;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.send_chunk(&stream_id, String::new(), true).await;

        match failure {
            Some(e) => Err(e),
            None => Ok(reply),
        }
    }

    async fn send_chunk(&self, stream_id: &str, content: String, stream_complete: bool) {
        self.hub
            .broadcast(Message::AgentStreamChunk(AgentStreamChunkMessage {
                id: stream_id.to_string(),
                content,
                stream_complete,
            }))
            .await;
    }
}

/// Sliding window of the last `k` human/AI exchanges
#[derive(Debug, Default)]
pub struct ConversationMemory {
    exchanges: Mutex<VecDeque<(String, String)>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, human: impl Into<String>, ai: impl Into<String>, k: usize) {
        let mut exchanges = self.exchanges.lock().unwrap_or_else(PoisonError::into_inner);
        exchanges.push_back((human.into(), ai.into()));
        while exchanges.len() > k {
            exchanges.pop_front();
        }
    }

    pub fn exchanges(&self) -> Vec<(String, String)> {
        self.exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.exchanges.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// The handlers every hub serves.
pub fn builtin_handlers() -> Vec<Arc<dyn ChatHandler>> {
    vec![
        Arc::new(DefaultChatHandler::new()),
        Arc::new(AskChatHandler::new()),
        Arc::new(LearnChatHandler::new()),
        Arc::new(ClearChatHandler),
    ]
}

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Instant,
};

use tokio::{
    sync::{Mutex, mpsc::UnboundedSender},
    task::JoinHandle,
};

use crate::{
    chat::{
        handlers::{ChatContext, ChatHandler, DEFAULT_HANDLER_ID},
        model::*,
        retriever::{EmbeddingIndex, Retriever},
    },
    config::ChatConfig,
    config_manager::ConfigManager,
    usage::UsageTracker,
};

/// Shared services the chat handlers work with
#[derive(Clone)]
pub struct ChatServices {
    pub config_manager: Arc<ConfigManager>,
    pub usage: UsageTracker,
    pub index: Arc<EmbeddingIndex>,
    pub retriever: Arc<dyn Retriever>,
    pub chat: ChatConfig,
}

struct ConnectedClient {
    client: ChatClient,
    sender: UnboundedSender<String>,
}

/// Fans chat messages out to every connected websocket and keeps the
/// shared history
///
/// Lock order is `history` before `clients`.
pub struct ChatHub {
    history: Mutex<ChatHistory>,
    clients: Mutex<HashMap<String, ConnectedClient>>,
    handlers: BTreeMap<String, Arc<dyn ChatHandler>>,
    services: ChatServices,
}

impl ChatHub {
    /// Handlers are keyed by `/<slash_id>`, the default handler by `default`.
    pub fn new(services: ChatServices, handlers: Vec<Arc<dyn ChatHandler>>) -> Arc<Self> {
        let handlers = handlers
            .into_iter()
            .map(|handler| (handler.routing_type().route_key(), handler))
            .collect();
        Arc::new(Self {
            history: Mutex::new(ChatHistory::default()),
            clients: Mutex::new(HashMap::new()),
            handlers,
            services,
        })
    }

    pub fn services(&self) -> &ChatServices {
        &self.services
    }

    pub fn handlers(&self) -> impl Iterator<Item = (&String, &Arc<dyn ChatHandler>)> {
        self.handlers.iter()
    }

    pub async fn history(&self) -> ChatHistory {
        self.history.lock().await.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Register a connection and greet it with the current history.
    pub async fn connect(&self, user: ChatUser, sender: UnboundedSender<String>) -> String {
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let history = self.history.lock().await;

        let greeting = Message::Connection(ConnectionMessage {
            client_id: client_id.clone(),
            history: history.clone(),
        });
        match serde_json::to_string(&greeting) {
            Ok(text) => {
                let _ = sender.send(text);
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize connection message"),
        }

        let mut clients = self.clients.lock().await;
        clients.insert(
            client_id.clone(),
            ConnectedClient {
                client: ChatClient { user, id: client_id.clone() },
                sender,
            },
        );

        tracing::info!("Client connected. ID: {}", client_id);
        tracing::debug!(clients = ?clients.keys().collect::<Vec<_>>(), "Connected clients");
        client_id
    }

    pub async fn disconnect(&self, client_id: &str) {
        let mut clients = self.clients.lock().await;
        clients.remove(client_id);
        tracing::info!("Client disconnected. ID: {}", client_id);
        tracing::debug!(clients = ?clients.keys().collect::<Vec<_>>(), "Connected clients");
    }

    /// Send a message to every client, then fold it into the history.
    pub async fn broadcast(&self, message: Message) {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize chat message");
                return;
            }
        };
        tracing::debug!(message = %text, "Broadcasting message to all clients");

        let mut history = self.history.lock().await;
        {
            let clients = self.clients.lock().await;
            for (client_id, connected) in clients.iter() {
                if connected.sender.send(text.clone()).is_err() {
                    tracing::debug!(client_id = %client_id, "Dropping message for closed connection");
                }
            }
        }

        match message {
            Message::Human(m) => history.messages.push(ChatMessage::Human(m)),
            Message::Agent(m) => history.messages.push(ChatMessage::Agent(m)),
            Message::AgentStream(m) => history.messages.push(ChatMessage::AgentStream(m)),
            Message::AgentStreamChunk(chunk) => {
                let stream = history.messages.iter_mut().rev().find_map(|m| match m {
                    ChatMessage::AgentStream(stream) if stream.id == chunk.id => Some(stream),
                    _ => None,
                });
                if let Some(stream) = stream {
                    stream.body.push_str(&chunk.content);
                    stream.complete = chunk.stream_complete;
                }
            }
            Message::Pending(m) => history.pending_messages.push(m),
            Message::ClosePending(close) => history.pending_messages.retain(|m| m.id != close.id),
            Message::Connection(_) | Message::Clear(_) => {}
        }
    }

    /// Handle a text frame from `client_id`. Routing runs on its own task,
    /// whose handle is returned.
    pub async fn handle_incoming(self: &Arc<Self>, client_id: &str, text: &str) -> Option<JoinHandle<()>> {
        tracing::debug!(client_id, message = text, "Message received");

        let request: ChatRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(client_id, error = %e, "Invalid chat request");
                return None;
            }
        };

        let Some(client) = self.clients.lock().await.get(client_id).map(|c| c.client.clone()) else {
            tracing::error!(client_id, "Message from unknown client");
            return None;
        };

        let message = HumanChatMessage {
            id: new_message_id(),
            time: now_seconds(),
            body: request.prompt,
            client,
            selection: request.selection,
        };
        self.broadcast(Message::Human(message.clone())).await;

        Some(tokio::spawn(Arc::clone(self).route(message)))
    }

    /// Dispatch a human message to its slash command handler or the default one.
    pub async fn route(self: Arc<Self>, message: HumanChatMessage) {
        let maybe_command = message.body.split_whitespace().next().unwrap_or("");
        let is_command = message.body.starts_with('/')
            && maybe_command != DEFAULT_HANDLER_ID
            && self.handlers.contains_key(maybe_command);
        let command = if is_command { maybe_command } else { DEFAULT_HANDLER_ID };

        let Some(handler) = self.handlers.get(command).cloned() else {
            tracing::error!(command, "No chat handler registered");
            return;
        };
        let command_readable = if is_command { command.to_string() } else { "Default".to_string() };

        let start = Instant::now();
        let ctx = ChatContext::new(Arc::clone(&self));
        handler.on_message(&ctx, &message).await;

        let latency_ms = start.elapsed().as_millis();
        tracing::info!("{} chat handler resolved in {} ms.", command_readable, latency_ms);
    }

    /// Forget the history and pending messages on every client.
    pub async fn clear(&self) {
        {
            let mut history = self.history.lock().await;
            history.messages.clear();
            history.pending_messages.clear();
        }
        for handler in self.handlers.values() {
            handler.clear_memory();
        }
        self.broadcast(Message::Clear(ClearMessage {})).await;
    }
}

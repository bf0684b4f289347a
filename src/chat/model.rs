use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PERSONA_NAME: &str = "Cloudera Copilot";
pub const PERSONA_AVATAR_ROUTE: &str = "api/ai/static/jupyternaut.svg";

/// Environment variables consulted for the login name, in order
const LOGIN_ENV_VARS: [&str; 4] = ["LOGNAME", "USER", "LNAME", "USERNAME"];
const FALLBACK_LOGIN: &str = "copilot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub avatar_route: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: PERSONA_NAME.to_string(),
            avatar_route: PERSONA_AVATAR_ROUTE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatUser {
    pub username: String,
    pub initials: String,
    pub name: String,
    pub display_name: String,
    pub color: Option<String>,
    pub avatar_url: Option<String>,
}

/// A connected user together with its connection id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatClient {
    #[serde(flatten)]
    pub user: ChatUser,
    pub id: String,
}

/// What a client sends over the websocket
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub selection: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "human")]
pub struct HumanChatMessage {
    pub id: String,
    /// Seconds since the Unix epoch.
    pub time: f64,
    pub body: String,
    pub client: ChatClient,
    pub selection: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "agent")]
pub struct AgentChatMessage {
    pub id: String,
    pub time: f64,
    pub body: String,
    /// Id of the human message this replies to.
    pub reply_to: String,
    pub persona: Persona,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "agent-stream")]
pub struct AgentStreamMessage {
    pub id: String,
    pub time: f64,
    pub body: String,
    pub reply_to: String,
    pub persona: Persona,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "agent-stream-chunk")]
pub struct AgentStreamChunkMessage {
    pub id: String,
    pub content: String,
    pub stream_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "pending")]
pub struct PendingMessage {
    pub id: String,
    pub time: f64,
    pub body: String,
    pub reply_to: String,
    pub persona: Persona,
    pub ellipsis: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "close-pending")]
pub struct ClosePendingMessage {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "connection")]
pub struct ConnectionMessage {
    pub client_id: String,
    pub history: ChatHistory,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "clear")]
pub struct ClearMessage {}

/// Messages kept in the chat history
///
/// `AgentStream` precedes `Agent` so that untagged deserialization only
/// falls back to `Agent` when there is no `complete` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatMessage {
    Human(HumanChatMessage),
    AgentStream(AgentStreamMessage),
    Agent(AgentChatMessage),
}

/// Everything the server pushes to clients
///
/// Each payload struct carries its own `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Human(HumanChatMessage),
    Agent(AgentChatMessage),
    AgentStream(AgentStreamMessage),
    AgentStreamChunk(AgentStreamChunkMessage),
    Pending(PendingMessage),
    ClosePending(ClosePendingMessage),
    Connection(ConnectionMessage),
    Clear(ClearMessage),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    pub messages: Vec<ChatMessage>,
    pub pending_messages: Vec<PendingMessage>,
}

/// Seconds since the Unix epoch, with sub-second precision
pub fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Chat user synthesized from the server's shell environment.
pub fn get_chat_user(configured_name: Option<&str>) -> ChatUser {
    let login = configured_name
        .map(str::to_string)
        .filter(|name| !name.is_empty())
        .or_else(|| {
            LOGIN_ENV_VARS
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .find(|value| !value.is_empty())
        })
        .unwrap_or_else(|| FALLBACK_LOGIN.to_string());

    ChatUser {
        initials: login.chars().take(1).flat_map(char::to_uppercase).collect(),
        username: login.clone(),
        name: login.clone(),
        display_name: login,
        color: None,
        avatar_url: None,
    }
}

/// Initials of up to three space-separated names, e.g. `"Ada King Lovelace"` -> `"AKL"`.
pub fn initials_from_name(name: &str) -> String {
    name.splitn(3, ' ')
        .filter_map(|part| part.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

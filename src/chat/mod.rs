//! Chat websocket backend: message model, hub and slash command handlers

pub mod handlers;
pub mod hub;
pub mod model;
pub mod retriever;

pub use handlers::{ChatContext, ChatHandler, RoutingType, builtin_handlers};
pub use hub::{ChatHub, ChatServices};
pub use model::{ChatHistory, ChatUser, Message, get_chat_user};
pub use retriever::{EmbeddingIndex, IndexRetriever, Retriever};

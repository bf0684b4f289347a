pub mod model;
pub mod provider;
pub mod sse;

pub use model::ApiDialect;
pub use provider::{ClouderaInferenceProvider, build_chat_completion_messages, build_completion_prompt};

use serde::{Deserialize, Serialize};

// Wire structures for the OpenAI-compatible inference gateway

/// Which OpenAI API an endpoint speaks, judged from its URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiDialect {
    /// `.../chat/completions`
    ChatCompletions,
    /// `.../completions`
    Completions,
}

impl ApiDialect {
    pub fn detect(endpoint: &str) -> Option<Self> {
        if endpoint.contains("chat/completions") {
            Some(Self::ChatCompletions)
        } else if endpoint.contains("completions") {
            Some(Self::Completions)
        } else {
            None
        }
    }
}

/// Generation limits used for a request
pub const TEMPERATURE: f32 = 1.0;
pub const STREAM_MAX_TOKENS: u32 = 256;
pub const INVOKE_MAX_TOKENS: u32 = 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatCompletionMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize, Debug)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatCompletionMessage>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Serialize, Debug)]
pub struct CompletionRequest {
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Response body shared by both dialects, streamed or not.
///
/// Streaming chat events carry `delta`, non-streaming chat responses carry
/// `message`, and the completions dialect carries `text` in both modes.
#[derive(Deserialize, Debug, Default)]
pub struct InferenceResponse {
    #[serde(default, deserialize_with = "crate::discovery::null_as_empty")]
    pub choices: Vec<InferenceChoice>,
}

#[derive(Deserialize, Debug, Default)]
pub struct InferenceChoice {
    #[serde(default)]
    pub message: Option<ChoiceContent>,
    #[serde(default)]
    pub delta: Option<ChoiceContent>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ChoiceContent {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

impl InferenceResponse {
    fn first(&self) -> Option<&InferenceChoice> {
        self.choices.first()
    }

    /// Text of a complete (non-streamed) response.
    pub fn completed_text(&self, dialect: ApiDialect) -> Option<&str> {
        let choice = self.first()?;
        match dialect {
            ApiDialect::ChatCompletions => choice.message.as_ref()?.content.as_deref(),
            ApiDialect::Completions => choice.text.as_deref(),
        }
    }

    /// Text carried by one streamed event.
    pub fn delta_text(&self, dialect: ApiDialect) -> Option<&str> {
        let choice = self.first()?;
        match dialect {
            ApiDialect::ChatCompletions => choice.delta.as_ref()?.content.as_deref(),
            ApiDialect::Completions => choice.text.as_deref(),
        }
    }
}

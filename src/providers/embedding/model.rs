use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Request schema spoken by an embeddings endpoint
///
/// NIM endpoints take the passage/query distinction as `input_type`; the
/// OpenAI-flavoured gateway encodes it as a model-name suffix instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiSyntax {
    #[default]
    OpenAi,
    Nim,
}

/// Whether texts are documents being indexed or a search query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedMode {
    Passage,
    Query,
}

impl EmbedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedMode::Passage => "passage",
            EmbedMode::Query => "query",
        }
    }
}

impl ApiSyntax {
    pub fn payload(&self, model: &str, texts: &[String], mode: EmbedMode) -> Value {
        match self {
            ApiSyntax::OpenAi => json!({
                "input": texts,
                "model": format!("{}-{}", model, mode.as_str()),
            }),
            ApiSyntax::Nim => json!({
                "input": texts,
                "input_type": mode.as_str(),
                "model": model,
            }),
        }
    }
}

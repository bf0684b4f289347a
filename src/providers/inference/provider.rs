use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::json;

use crate::{
    auth::TokenSource,
    discovery::{InferenceModel, ModelType, get_copilot_models},
    errors::{AppError, AppResult, messages::REQUEST_FAILED},
    providers::{
        BaseMessage, LanguageModelProvider, ProviderInfo, Role, StreamResponse,
        inference::{model::*, sse::{SseLine, SseLineDecoder, classify_line}},
    },
};

/// Cloudera AI Inference language model provider
///
/// Serves every non-embedding model listed in the Copilot catalog. The
/// endpoint URL of a model decides whether it is spoken to through the
/// chat completions or the legacy completions API.
pub struct ClouderaInferenceProvider {
    models: Vec<InferenceModel>,
    client: Client,
    token_source: Arc<dyn TokenSource>,
}

impl ClouderaInferenceProvider {
    pub const ID: &'static str = "cloudera";
    pub const NAME: &'static str = "Cloudera AI Inference Provider";

    pub fn new(models: Vec<InferenceModel>, client: Client, token_source: Arc<dyn TokenSource>) -> Self {
        Self { models, client, token_source }
    }

    /// Build the provider from the inference-type entries of a catalog file.
    pub fn from_catalog(
        catalog_path: Option<&Path>,
        client: Client,
        token_source: Arc<dyn TokenSource>,
    ) -> AppResult<Self> {
        let (models, _) = get_copilot_models(catalog_path, ModelType::Inference)?;
        Ok(Self::new(models, client, token_source))
    }

    pub fn inference_endpoint(&self, model: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.name == model)
            .map(|m| m.endpoint.as_str())
    }

    fn resolve(&self, model: &str) -> AppResult<(String, ApiDialect)> {
        let Some(endpoint) = self.inference_endpoint(model) else {
            tracing::error!("Unable to find endpoint: {}", model);
            return Err(AppError::model_not_configured(model));
        };
        let dialect = ApiDialect::detect(endpoint).ok_or_else(|| {
            tracing::error!(model, endpoint, "Endpoint is neither a chat completions nor a completions API");
            AppError::model_not_configured(model)
        })?;
        Ok((endpoint.to_string(), dialect))
    }

    fn build_body(dialect: ApiDialect, model: &str, messages: &[BaseMessage], stream: bool) -> serde_json::Value {
        let max_tokens = if stream { STREAM_MAX_TOKENS } else { INVOKE_MAX_TOKENS };
        match dialect {
            ApiDialect::ChatCompletions => json!(ChatCompletionRequest {
                messages: build_chat_completion_messages(messages),
                model: model.to_string(),
                temperature: TEMPERATURE,
                max_tokens,
                stream,
            }),
            ApiDialect::Completions => json!(CompletionRequest {
                prompt: build_completion_prompt(messages),
                model: model.to_string(),
                temperature: TEMPERATURE,
                max_tokens,
                stream,
            }),
        }
    }

    /// POST a request body and hand back the successful response
    async fn send(&self, endpoint: &str, body: &serde_json::Value) -> AppResult<reqwest::Response> {
        let access_token = self.token_source.access_token().await?;

        tracing::debug!(endpoint, request = %body, "Sending inference request");

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint, error = %e, "Inference request failed");
                AppError::provider_error(502, format!("{} {}", REQUEST_FAILED, e))
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!(endpoint, status, "Inference endpoint returned an error status");
            return Err(AppError::model_response(
                "not_ok_status",
                json!({
                    "response_http_status": status,
                    "response": error_body,
                    "endpoint": endpoint,
                }),
            ));
        }

        Ok(response)
    }
}

/// Map host messages onto chat completions messages
pub fn build_chat_completion_messages(messages: &[BaseMessage]) -> Vec<ChatCompletionMessage> {
    messages
        .iter()
        .map(|message| {
            let role = match message.role {
                Role::System => "system",
                Role::Human => "user",
                Role::Ai => "assistant",
            };
            ChatCompletionMessage {
                role: role.to_string(),
                content: message.content.clone(),
            }
        })
        .collect()
}

/// Flatten a conversation into a Human/AI transcript prompt
pub fn build_completion_prompt(messages: &[BaseMessage]) -> String {
    let mut prompt = String::new();
    for message in messages {
        match message.role {
            Role::System => {
                prompt.push_str(&message.content);
                prompt.push('\n');
            }
            Role::Human => {
                prompt.push_str("\nHuman: ");
                prompt.push_str(&message.content);
            }
            Role::Ai => {
                prompt.push_str("\nAI: ");
                prompt.push_str(&message.content);
            }
        }
    }
    prompt.push_str("\nAI: ");
    prompt
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    Skip,
    Done,
}

fn parse_stream_line(dialect: ApiDialect, line: &str) -> AppResult<StreamEvent> {
    let data = match classify_line(line) {
        SseLine::Skip => return Ok(StreamEvent::Skip),
        SseLine::Done => return Ok(StreamEvent::Done),
        SseLine::Data(data) => data,
    };
    let event: InferenceResponse = serde_json::from_str(data).map_err(|e| {
        AppError::model_response(
            "not a JSON stream event",
            json!({ "line": data, "error": e.to_string() }),
        )
    })?;
    Ok(match event.delta_text(dialect) {
        Some(text) => StreamEvent::Text(text.to_string()),
        None => StreamEvent::Skip,
    })
}

#[async_trait]
impl LanguageModelProvider for ClouderaInferenceProvider {
    fn info(&self) -> ProviderInfo {
        let models: Vec<String> = self.models.iter().map(|m| m.name.clone()).collect();
        ProviderInfo {
            id: Self::ID.to_string(),
            name: Self::NAME.to_string(),
            chat_models: models.clone(),
            completion_models: models.clone(),
            models,
            ..ProviderInfo::default()
        }
    }

    async fn invoke(&self, model_id: &str, messages: &[BaseMessage]) -> Result<String, AppError> {
        let (endpoint, dialect) = self.resolve(model_id)?;
        let body = Self::build_body(dialect, model_id, messages, false);

        tracing::info!(model = model_id, ?dialect, "Invoking inference model");
        let response = self.send(&endpoint, &body).await?;

        let parsed: InferenceResponse = response.json().await.map_err(|e| {
            AppError::model_response("not a JSON response", json!({ "error": e.to_string() }))
        })?;

        match parsed.completed_text(dialect) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => Err(AppError::model_response(
                "no content in response",
                json!({ "endpoint": endpoint }),
            )),
        }
    }

    async fn stream(&self, model_id: &str, messages: &[BaseMessage]) -> Result<StreamResponse, AppError> {
        let (endpoint, dialect) = self.resolve(model_id)?;
        let body = Self::build_body(dialect, model_id, messages, true);

        tracing::info!(model = model_id, ?dialect, "Streaming from inference model");
        let response = self.send(&endpoint, &body).await?;

        let stream = async_stream::stream! {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseLineDecoder::new();
            let mut finished = false;
            while !finished {
                let lines = match bytes.next().await {
                    Some(Ok(chunk)) => decoder.push(&chunk),
                    Some(Err(e)) => {
                        yield Err(AppError::provider_error(
                            502,
                            format!("{} {}", REQUEST_FAILED, e),
                        ));
                        break;
                    }
                    None => {
                        finished = true;
                        decoder.finish().into_iter().collect()
                    }
                };
                for line in lines {
                    match parse_stream_line(dialect, &line) {
                        Ok(StreamEvent::Text(text)) => yield Ok(text),
                        Ok(StreamEvent::Skip) => {}
                        Ok(StreamEvent::Done) => {
                            finished = true;
                            break;
                        }
                        Err(e) => {
                            yield Err(e);
                            finished = true;
                            break;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<BaseMessage> {
        vec![
            BaseMessage::system("You are helpful."),
            BaseMessage::human("Hi"),
            BaseMessage::ai("Hello!"),
            BaseMessage::human("Plot a sine wave"),
        ]
    }

    #[test]
    fn test_completion_prompt_transcript() {
        assert_eq!(
            build_completion_prompt(&conversation()),
            "You are helpful.\n\nHuman: Hi\nAI: Hello!\nHuman: Plot a sine wave\nAI: "
        );
        assert_eq!(build_completion_prompt(&[]), "\nAI: ");
    }

    #[test]
    fn test_chat_roles() {
        let roles: Vec<String> = build_chat_completion_messages(&conversation())
            .into_iter()
            .map(|m| m.role)
            .collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    }

    #[test]
    fn test_dialect_detection() {
        assert_eq!(
            ApiDialect::detect("https://gw/v1/chat/completions"),
            Some(ApiDialect::ChatCompletions)
        );
        assert_eq!(ApiDialect::detect("https://gw/v1/completions"), Some(ApiDialect::Completions));
        assert_eq!(ApiDialect::detect("https://gw/v1/embeddings"), None);
    }

    #[test]
    fn test_body_limits_and_prompt_escaping() {
        let messages = vec![BaseMessage::human("say \"hi\"\n\tplease")];
        let body = ClouderaInferenceProvider::build_body(ApiDialect::Completions, "m", &messages, true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 1.0);
        assert_eq!(body["prompt"], "\nHuman: say \"hi\"\n\tplease\nAI: ");

        let body = ClouderaInferenceProvider::build_body(ApiDialect::ChatCompletions, "m", &messages, false);
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("prompt").is_none());
    }

    #[test]
    fn test_parse_stream_lines() {
        let chat = ApiDialect::ChatCompletions;
        assert_eq!(
            parse_stream_line(chat, r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#).unwrap(),
            StreamEvent::Text("Hel".into())
        );
        assert_eq!(
            parse_stream_line(chat, r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(),
            StreamEvent::Skip
        );
        assert_eq!(
            parse_stream_line(ApiDialect::Completions, r#"data: {"choices":[{"text":"lo"}]}"#).unwrap(),
            StreamEvent::Text("lo".into())
        );
        assert_eq!(parse_stream_line(chat, "data: [DONE]").unwrap(), StreamEvent::Done);

        let err = parse_stream_line(chat, "data: <html>").unwrap_err();
        assert_eq!(err.reason(), Some("not a JSON stream event"));
    }
}

use std::sync::Arc;

use copilot_server::{
    AppError,
    auth::{JwtFileTokenSource, StaticTokenSource, TokenSource},
    discovery::InferenceModel,
    providers::{BaseMessage, LanguageModelProvider, inference::ClouderaInferenceProvider},
};
use futures::StreamExt;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn provider_for(server: &MockServer, token: Arc<dyn TokenSource>) -> ClouderaInferenceProvider {
    let models = vec![
        InferenceModel {
            name: "llama-chat".to_string(),
            endpoint: format!("{}/v1/chat/completions", server.uri()),
        },
        InferenceModel {
            name: "starcoder".to_string(),
            endpoint: format!("{}/v1/completions", server.uri()),
        },
    ];
    ClouderaInferenceProvider::new(models, reqwest::Client::new(), token)
}

fn static_token() -> Arc<dyn TokenSource> {
    Arc::new(StaticTokenSource("test-token".to_string()))
}

fn conversation() -> Vec<BaseMessage> {
    vec![BaseMessage::system("Be brief."), BaseMessage::human("What is CML?")]
}

#[tokio::test]
async fn test_chat_completions_invoke() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_partial_json(json!({
            "model": "llama-chat",
            "max_tokens": 1024,
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be brief."},
                {"role": "user", "content": "What is CML?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "A platform."}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    let answer = provider.invoke("llama-chat", &conversation()).await.unwrap();
    assert_eq!(answer, "A platform.");
}

#[tokio::test]
async fn test_completions_invoke_uses_transcript_prompt() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .and(body_partial_json(json!({
            "prompt": "Be brief.\n\nHuman: What is CML?\nAI: ",
            "temperature": 1.0
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"text": "A platform.", "finish_reason": "stop"}]
        })))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    assert_eq!(provider.invoke("starcoder", &conversation()).await.unwrap(), "A platform.");
}

#[tokio::test]
async fn test_chat_completions_stream() {
    let mock_server = MockServer::start().await;

    let body = concat!(
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\r\n\r\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
        "data: {\"choices\":null,\"usage\":{\"completion_tokens\":2}}\n\n",
        "data: [DONE]\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true, "max_tokens": 256})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    let chunks: Vec<String> = provider
        .stream("llama-chat", &conversation())
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec!["Hel", "lo"]);
}

#[tokio::test]
async fn test_completions_stream_without_done_marker() {
    let mock_server = MockServer::start().await;

    let body = "data\n\ndata: {\"choices\":[{\"text\":\"def \"}]}\n\ndata: {\"choices\":[{\"text\":\"f():\"}]}";
    Mock::given(method("POST"))
        .and(path("/v1/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    let chunks: Vec<String> = provider
        .stream("starcoder", &conversation())
        .await
        .unwrap()
        .map(|chunk| chunk.unwrap())
        .collect()
        .await;
    assert_eq!(chunks.concat(), "def f():");
}

#[tokio::test]
async fn test_stream_reports_invalid_event() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: not json\n\n",
            "text/event-stream",
        ))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    let items: Vec<Result<String, AppError>> = provider
        .stream("llama-chat", &conversation())
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_ref().unwrap(), "ok");
    assert_eq!(items[1].as_ref().unwrap_err().reason(), Some("not a JSON stream event"));
}

#[tokio::test]
async fn test_error_status_is_a_model_response_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("model is scaling up"))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, static_token());
    let err = provider.invoke("llama-chat", &conversation()).await.unwrap_err();
    match &err {
        AppError::ModelResponse { detail } => {
            assert_eq!(detail["reason"], "not_ok_status");
            assert_eq!(detail["response_http_status"], 503);
            assert_eq!(detail["response"], "model is scaling up");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert!(provider.stream("llama-chat", &conversation()).await.is_err());
}

#[tokio::test]
async fn test_empty_content_is_rejected() {
    for choices in [json!([]), json!(null)] {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "choices": choices })))
            .mount(&mock_server)
            .await;

        let provider = provider_for(&mock_server, static_token());
        let err = provider.invoke("llama-chat", &conversation()).await.unwrap_err();
        assert_eq!(err.reason(), Some("no content in response"), "choices: {choices}");
    }
}

#[tokio::test]
async fn test_unknown_model_is_not_configured() {
    let mock_server = MockServer::start().await;
    let provider = provider_for(&mock_server, static_token());

    let err = provider.invoke("missing", &conversation()).await.unwrap_err();
    assert!(matches!(err, AppError::ModelNotConfigured { model } if model == "missing"));
}

#[tokio::test]
async fn test_token_is_read_from_jwt_file() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let jwt_path = dir.path().join("jwt");
    std::fs::write(&jwt_path, r#"{"access_token": "from-file"}"#).unwrap();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer from-file"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "ok"}}]
        })))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, Arc::new(JwtFileTokenSource::new(&jwt_path)));
    assert_eq!(provider.invoke("llama-chat", &conversation()).await.unwrap(), "ok");

    std::fs::remove_file(&jwt_path).unwrap();
    let err = provider.invoke("llama-chat", &conversation()).await.unwrap_err();
    assert!(matches!(err, AppError::AuthenticationError(_)));
}

use std::sync::Arc;

use copilot_server::{
    AppError,
    auth::StaticTokenSource,
    discovery::InferenceModel,
    providers::{
        EmbeddingsProvider,
        embedding::{ApiSyntax, ClouderaEmbeddingProvider},
    },
};
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, header, method, path},
};

fn provider_for(server: &MockServer, api_syntax: ApiSyntax) -> ClouderaEmbeddingProvider {
    let models = vec![InferenceModel {
        name: "e5".to_string(),
        endpoint: format!("{}/v1/embeddings", server.uri()),
    }];
    ClouderaEmbeddingProvider::new(
        models,
        reqwest::Client::new(),
        Arc::new(StaticTokenSource("embed-token".to_string())),
        api_syntax,
    )
}

fn texts() -> Vec<String> {
    vec!["first passage".to_string(), "second passage".to_string()]
}

#[tokio::test]
async fn test_openai_syntax_documents() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("authorization", "Bearer embed-token"))
        .and(body_json(json!({
            "input": ["first passage", "second passage"],
            "model": "e5-passage"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.0, 1.0]},
                {"object": "embedding", "index": 0, "embedding": [1.0, 0.0]}
            ]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::OpenAi);
    let vectors = provider.embed_documents("e5", &texts()).await.unwrap();
    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn test_nim_syntax_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_json(json!({
            "input": ["what is spark?"],
            "input_type": "query",
            "model": "e5"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"object": "embedding", "index": 0, "embedding": [0.5, 0.5]}]
        })))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::Nim);
    assert_eq!(provider.embed_query("e5", "what is spark?").await.unwrap(), vec![0.5, 0.5]);
}

#[tokio::test]
async fn test_empty_input_makes_no_request() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::OpenAi);
    assert!(provider.embed_documents("e5", &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_count_mismatch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"object": "embedding", "index": 0, "embedding": [1.0]}]
        })))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::OpenAi);
    let err = provider.embed_documents("e5", &texts()).await.unwrap_err();
    match err {
        AppError::ModelResponse { detail } => {
            assert_eq!(detail["reason"], "mismatching number of embeddings");
            assert_eq!(detail["expected_num_embeddings"], 2);
            assert_eq!(detail["actual_num_embeddings"], 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_response_shape_errors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"object": "list"})))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::OpenAi);
    let err = provider.embed_query("e5", "q").await.unwrap_err();
    assert_eq!(err.reason(), Some("no data field in response"));
}

#[tokio::test]
async fn test_error_status_and_unknown_model() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such model"))
        .mount(&mock_server)
        .await;

    let provider = provider_for(&mock_server, ApiSyntax::OpenAi);
    let err = provider.embed_query("e5", "q").await.unwrap_err();
    assert_eq!(err.reason(), Some("not_ok_status"));

    let err = provider.embed_query("missing", "q").await.unwrap_err();
    assert!(matches!(err, AppError::ModelNotConfigured { .. }));
}

use std::{collections::BTreeSet, path::Path, sync::Arc};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::{
    auth::TokenSource,
    discovery::{InferenceModel, ModelType, get_copilot_models},
    errors::{AppError, AppResult},
    providers::{EmbeddingsProvider, ProviderInfo, embedding::model::{ApiSyntax, EmbedMode}},
};

/// Cloudera AI Inference embedding provider
pub struct ClouderaEmbeddingProvider {
    models: Vec<InferenceModel>,
    client: Client,
    token_source: Arc<dyn TokenSource>,
    api_syntax: ApiSyntax,
}

impl ClouderaEmbeddingProvider {
    pub const ID: &'static str = "cloudera";
    pub const NAME: &'static str = "Cloudera AI Embedding Provider";
    pub const MODEL_ID_KEY: &'static str = "model_id";

    pub fn new(
        models: Vec<InferenceModel>,
        client: Client,
        token_source: Arc<dyn TokenSource>,
        api_syntax: ApiSyntax,
    ) -> Self {
        Self { models, client, token_source, api_syntax }
    }

    /// Build the provider from the embedding-type entries of a catalog file.
    pub fn from_catalog(
        catalog_path: Option<&Path>,
        client: Client,
        token_source: Arc<dyn TokenSource>,
        api_syntax: ApiSyntax,
    ) -> AppResult<Self> {
        let (models, _) = get_copilot_models(catalog_path, ModelType::Embedding)?;
        Ok(Self::new(models, client, token_source, api_syntax))
    }

    pub fn inference_endpoint(&self, model: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|m| m.name == model)
            .map(|m| m.endpoint.as_str())
    }

    async fn call(&self, model: &str, texts: &[String], mode: EmbedMode) -> AppResult<Vec<Vec<f32>>> {
        let endpoint = self
            .inference_endpoint(model)
            .ok_or_else(|| AppError::model_not_configured(model))?;

        let payload = self.api_syntax.payload(model, texts, mode);
        let access_token = self.token_source.access_token().await?;

        tracing::debug!(model, endpoint, mode = mode.as_str(), count = texts.len(), "Requesting embeddings");

        let response = self
            .client
            .post(endpoint)
            .header("Content-Type", "application/json")
            .bearer_auth(access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(endpoint, error = %e, "Embedding request failed");
                AppError::model_response("failed talking to the model endpoint", json!({}))
            })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(AppError::model_response(
                "not_ok_status",
                json!({
                    "response_http_status": status.as_u16(),
                    "response": body,
                    "endpoint": endpoint,
                }),
            ));
        }

        let response_json: Value = serde_json::from_str(&body)
            .map_err(|_| AppError::model_response("not a JSON response", json!({})))?;
        let data = response_json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| AppError::model_response("no data field in response", json!({})))?;

        let embeddings = extract_embeddings(data)?;
        if embeddings.len() != texts.len() {
            return Err(AppError::model_response(
                "mismatching number of embeddings",
                json!({
                    "expected_num_embeddings": texts.len(),
                    "actual_num_embeddings": embeddings.len(),
                }),
            ));
        }
        Ok(embeddings)
    }
}

/// Place each `"object": "embedding"` entry of a response at its index
///
/// Entries of other object types are ignored. Every index in
/// `0..data.len()` must be filled exactly once.
pub fn extract_embeddings(data: &[Value]) -> AppResult<Vec<Vec<f32>>> {
    let mut embeddings: Vec<Vec<f32>> = vec![Vec::new(); data.len()];
    let mut expected_indices: BTreeSet<usize> = (0..data.len()).collect();

    for entry in data {
        if entry.get("object").and_then(Value::as_str).unwrap_or("") != "embedding" {
            continue;
        }
        let unexpected_structure = || {
            AppError::model_response(
                "unexpected structure of embedding entry found",
                json!({ "entry": entry, "expected_keys": ["index", "embedding"] }),
            )
        };
        let (Some(index), Some(embedding)) = (entry.get("index"), entry.get("embedding")) else {
            return Err(unexpected_structure());
        };

        let index = index
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .filter(|i| expected_indices.contains(i))
            .ok_or_else(|| {
                AppError::model_response(
                    "embedding index not expected",
                    json!({ "index": index, "expected_max_index": data.len() - 1 }),
                )
            })?;
        let vector: Vec<f32> =
            serde_json::from_value(embedding.clone()).map_err(|_| unexpected_structure())?;

        expected_indices.remove(&index);
        embeddings[index] = vector;
    }

    if !expected_indices.is_empty() {
        return Err(AppError::model_response(
            "no embedding found for some indices",
            json!({ "indices": expected_indices }),
        ));
    }
    Ok(embeddings)
}

#[async_trait]
impl EmbeddingsProvider for ClouderaEmbeddingProvider {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: Self::ID.to_string(),
            name: Self::NAME.to_string(),
            models: self.models.iter().map(|m| m.name.clone()).collect(),
            model_id_label: Some(Self::MODEL_ID_KEY.to_string()),
            ..ProviderInfo::default()
        }
    }

    async fn embed_documents(&self, model_id: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.call(model_id, texts, EmbedMode::Passage).await
    }

    async fn embed_query(&self, model_id: &str, text: &str) -> Result<Vec<f32>, AppError> {
        self.call(model_id, &[text.to_string()], EmbedMode::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::model_response("mismatching number of embeddings", json!({})))
    }
}

//! Loading the Copilot model catalog.
//!
//! The catalog is a JSON document maintained by the platform. Cloudera AI
//! Inference models live under `aiInferenceModels`, third-party models the
//! administrator enabled (e.g. Bedrock) under `thirdPartyModels`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// One entry of `aiInferenceModels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceModel {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirdPartyModel {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopilotCatalog {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub ai_inference_models: Vec<InferenceModel>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub third_party_models: Vec<ThirdPartyModel>,
}

/// Deserialize a missing or `null` list as empty.
pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    Inference,
    Embedding,
}

impl InferenceModel {
    pub fn is_embedding(&self) -> bool {
        self.endpoint.ends_with("/embeddings")
    }

    pub fn matches(&self, model_type: ModelType) -> bool {
        match model_type {
            ModelType::Embedding => self.is_embedding(),
            ModelType::Inference => !self.is_embedding(),
        }
    }
}

impl CopilotCatalog {
    /// Load the catalog; an unset or missing path yields an empty catalog.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let Some(path) = path.filter(|p| !p.as_os_str().is_empty()) else {
            return Ok(Self::default());
        };
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Copilot config dir does not exist");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        // An empty JSON document (`null`) behaves like an empty catalog.
        let catalog: Option<Self> = serde_json::from_str(&raw).map_err(|e| {
            AppError::ConfigError(format!("Invalid Copilot config {}: {}", path.display(), e))
        })?;
        Ok(catalog.unwrap_or_default())
    }

    pub fn models_of_type(&self, model_type: ModelType) -> Vec<InferenceModel> {
        self.ai_inference_models
            .iter()
            .filter(|model| model.matches(model_type))
            .cloned()
            .collect()
    }

    pub fn third_party_model_names(&self) -> Vec<String> {
        self.third_party_models.iter().map(|m| m.name.clone()).collect()
    }
}

/// Catalog entries of one type plus their names, both in file order.
pub fn get_copilot_models(
    path: Option<&Path>,
    model_type: ModelType,
) -> AppResult<(Vec<InferenceModel>, Vec<String>)> {
    let models = CopilotCatalog::load(path)?.models_of_type(model_type);
    let names = models.iter().map(|m| m.name.clone()).collect();
    Ok((models, names))
}

/// Names of the third-party models the administrator enabled.
pub fn configured_third_party_models(path: Option<&Path>) -> AppResult<Vec<String>> {
    Ok(CopilotCatalog::load(path)?.third_party_model_names())
}

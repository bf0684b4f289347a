use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{
    errors::{AppError, AppResult},
    providers::{EmbeddingsProvider, LanguageModelProvider, ProviderInfo, ProviderRegistry},
};

/// Per-model field values, keyed by global model id
pub type ModelFields = BTreeMap<String, BTreeMap<String, Value>>;

/// User-level settings persisted between server restarts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub model_provider_id: Option<String>,
    pub embeddings_provider_id: Option<String>,
    pub send_with_shift_enter: bool,
    pub fields: ModelFields,
    pub api_keys: BTreeMap<String, String>,
}

/// What `GET /api/ai/config` returns: key names only, never key values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeConfigResponse {
    pub model_provider_id: Option<String>,
    pub embeddings_provider_id: Option<String>,
    pub send_with_shift_enter: bool,
    pub fields: ModelFields,
    pub api_keys: Vec<String>,
    /// Milliseconds since the Unix epoch; echo it back on update.
    pub last_read: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfigRequest {
    pub model_provider_id: Option<String>,
    pub embeddings_provider_id: Option<String>,
    pub send_with_shift_enter: Option<bool>,
    pub api_keys: Option<BTreeMap<String, String>>,
    pub fields: Option<ModelFields>,
    pub last_read: Option<i64>,
}

struct State {
    config: GlobalConfig,
    last_write: i64,
}

/// Owns the global config and its JSON file
pub struct ConfigManager {
    path: Option<PathBuf>,
    registry: Arc<ProviderRegistry>,
    state: RwLock<State>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ConfigManager {
    /// Load the config from `path` if it exists; without a path the config
    /// lives in memory only.
    pub fn load(path: Option<&Path>, registry: Arc<ProviderRegistry>) -> AppResult<Self> {
        let config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    AppError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    AppError::ConfigError(format!("Invalid config file {}: {}", path.display(), e))
                })?
            }
            _ => GlobalConfig::default(),
        };

        tracing::info!(
            path = ?path,
            model_provider_id = ?config.model_provider_id,
            embeddings_provider_id = ?config.embeddings_provider_id,
            "Global config loaded"
        );

        Ok(Self {
            path: path.map(Path::to_path_buf),
            registry,
            state: RwLock::new(State { config, last_write: 0 }),
        })
    }

    pub async fn get_config(&self) -> DescribeConfigResponse {
        let state = self.state.read().await;
        let config = &state.config;
        DescribeConfigResponse {
            model_provider_id: config.model_provider_id.clone(),
            embeddings_provider_id: config.embeddings_provider_id.clone(),
            send_with_shift_enter: config.send_with_shift_enter,
            fields: config.fields.clone(),
            api_keys: config.api_keys.keys().cloned().collect(),
            last_read: now_ms(),
        }
    }

    pub async fn update_config(&self, request: UpdateConfigRequest) -> AppResult<()> {
        let mut state = self.state.write().await;

        if let Some(last_read) = request.last_read {
            if last_read < state.last_write {
                return Err(AppError::WriteConflict(
                    "Configuration was modified after it was read from disk.".to_string(),
                ));
            }
        }

        if let Some(api_keys) = &request.api_keys {
            if let Some((name, _)) = api_keys.iter().find(|(_, value)| value.is_empty()) {
                return Err(AppError::KeyEmpty(name.clone()));
            }
        }

        let mut config = state.config.clone();
        if let Some(id) = request.model_provider_id {
            self.registry
                .language_model(&id)
                .map_err(|e| AppError::ValidationError(e.to_string()))?;
            config.model_provider_id = Some(id);
        }
        if let Some(id) = request.embeddings_provider_id {
            self.registry
                .embedding_model(&id)
                .map_err(|e| AppError::ValidationError(e.to_string()))?;
            config.embeddings_provider_id = Some(id);
        }
        if let Some(send_with_shift_enter) = request.send_with_shift_enter {
            config.send_with_shift_enter = send_with_shift_enter;
        }
        if let Some(api_keys) = request.api_keys {
            config.api_keys.extend(api_keys);
        }
        if let Some(fields) = request.fields {
            config.fields.extend(fields);
        }

        self.persist(&config).await?;
        state.config = config;
        state.last_write = now_ms();
        tracing::info!("Global config updated");
        Ok(())
    }

    pub async fn delete_api_key(&self, name: &str) -> AppResult<()> {
        let mut state = self.state.write().await;
        if !state.config.api_keys.contains_key(name) {
            return Err(AppError::ValidationError(format!("API key '{}' does not exist", name)));
        }

        let mut config = state.config.clone();
        config.api_keys.remove(name);
        self.persist(&config).await?;
        state.config = config;
        state.last_write = now_ms();
        tracing::info!(api_key = name, "API key deleted");
        Ok(())
    }

    /// Description of the selected language model's provider.
    pub async fn lm_provider(&self) -> Option<ProviderInfo> {
        self.language_model()
            .await
            .ok()
            .flatten()
            .map(|(provider, _)| provider.info())
    }

    /// The selected language model, or `None` when nothing is selected.
    pub async fn language_model(&self) -> AppResult<Option<(Arc<dyn LanguageModelProvider>, String)>> {
        match self.state.read().await.config.model_provider_id.as_deref() {
            Some(id) => self.registry.language_model(id).map(Some),
            None => Ok(None),
        }
    }

    pub async fn embedding_model(&self) -> AppResult<Option<(Arc<dyn EmbeddingsProvider>, String)>> {
        match self.state.read().await.config.embeddings_provider_id.as_deref() {
            Some(id) => self.registry.embedding_model(id).map(Some),
            None => Ok(None),
        }
    }

    async fn persist(&self, config: &GlobalConfig) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = serde_json::to_string_pretty(config)
            .map_err(|e| AppError::internal("failed to serialize config", serde_json::json!({ "error": e.to_string() })))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::ConfigError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|e| AppError::ConfigError(format!("Failed to write {}: {}", path.display(), e)))
    }
}

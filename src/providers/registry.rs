use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::{
    config::ModelPolicyConfig,
    errors::AppError,
    providers::{EmbeddingsProvider, LanguageModelProvider, ProviderField, ProviderInfo},
};

/// Entry of the `/providers` listings, shaped for the Copilot UI
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ListProvidersEntry {
    pub id: String,
    pub name: String,
    pub models: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub auth_strategy: Option<serde_json::Value>,
    pub registry: bool,
    pub fields: Vec<ProviderField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id_label: Option<String>,
}

/// Model-level allow/block lists, keyed by global model id
#[derive(Debug, Clone, Default)]
pub struct ModelPolicy {
    pub allowed_models: Option<Vec<String>>,
    pub blocked_models: Option<Vec<String>>,
}

impl From<&ModelPolicyConfig> for ModelPolicy {
    fn from(config: &ModelPolicyConfig) -> Self {
        Self {
            allowed_models: config.allowed_models.clone(),
            blocked_models: config.blocked_models.clone(),
        }
    }
}

impl ModelPolicy {
    fn is_unrestricted(&self) -> bool {
        self.allowed_models.is_none() && self.blocked_models.is_none()
    }

    /// Whether `provider_id:local_model_id` may be listed.
    ///
    /// A non-empty block list wins; otherwise the allow list decides. An
    /// empty block list with no allow list restricts nothing.
    pub fn permits(&self, provider_id: &str, local_model_id: &str) -> bool {
        let model_id = global_model_id(provider_id, local_model_id);
        match (&self.blocked_models, &self.allowed_models) {
            (Some(blocked), _) if !blocked.is_empty() => !blocked.contains(&model_id),
            (_, Some(allowed)) => allowed.contains(&model_id),
            _ => true,
        }
    }

    /// Drop disallowed models from the entries, then drop entries left empty.
    pub fn filter(&self, providers: Vec<ListProvidersEntry>) -> Vec<ListProvidersEntry> {
        if self.is_unrestricted() {
            return providers;
        }

        providers
            .into_iter()
            .map(|mut provider| {
                let keep = |models: Vec<String>| -> Vec<String> {
                    models
                        .into_iter()
                        .filter(|m| self.permits(&provider.id, m))
                        .collect()
                };
                provider.models = keep(std::mem::take(&mut provider.models));
                provider.chat_models = provider.chat_models.take().map(keep);
                provider.completion_models = provider.completion_models.take().map(keep);
                provider
            })
            .filter(|provider| !provider.models.is_empty())
            .collect()
    }
}

pub fn global_model_id(provider_id: &str, local_model_id: &str) -> String {
    format!("{}:{}", provider_id, local_model_id)
}

/// Split `provider:model` at the first colon.
pub fn split_model_id(global_id: &str) -> Option<(&str, &str)> {
    global_id
        .split_once(':')
        .filter(|(provider, model)| !provider.is_empty() && !model.is_empty())
}

/// Only Cloudera and Bedrock providers are surfaced in Copilot.
fn is_listed_provider(id: &str) -> bool {
    id == "cloudera" || is_third_party(id)
}

fn is_third_party(id: &str) -> bool {
    id.contains("bedrock")
}

/// Provider registry that manages every model provider the server exposes
///
/// Providers are keyed by id; language and embedding providers live in
/// separate namespaces, so both may use the id `cloudera`.
pub struct ProviderRegistry {
    lm_providers: BTreeMap<String, Arc<dyn LanguageModelProvider>>,
    em_providers: BTreeMap<String, Arc<dyn EmbeddingsProvider>>,
    allowed_providers: Option<Vec<String>>,
    blocked_providers: Option<Vec<String>>,
}

impl ProviderRegistry {
    /// 创建空的提供商注册表
    ///
    /// ## 功能说明
    /// 根据提供商级别的允许/屏蔽列表创建注册表，之后通过register_*方法注册提供商
    pub fn new(policy: &ModelPolicyConfig) -> Self {
        Self {
            lm_providers: BTreeMap::new(),
            em_providers: BTreeMap::new(),
            allowed_providers: policy.allowed_providers.clone(),
            blocked_providers: policy.blocked_providers.clone(),
        }
    }

    /// Create an empty provider registry without any provider restrictions
    pub fn new_empty() -> Self {
        Self::new(&ModelPolicyConfig::default())
    }

    fn provider_permitted(&self, id: &str) -> bool {
        if let Some(blocked) = &self.blocked_providers {
            if blocked.iter().any(|b| b == id) {
                return false;
            }
        }
        match &self.allowed_providers {
            Some(allowed) if !allowed.is_empty() => allowed.iter().any(|a| a == id),
            _ => true,
        }
    }

    /// 注册语言模型提供商
    ///
    /// 被提供商级别列表排除的提供商不会注册，返回false
    pub fn register_language_model(&mut self, provider: Arc<dyn LanguageModelProvider>) -> bool {
        let id = provider.info().id;
        if !self.provider_permitted(&id) {
            tracing::info!(provider = %id, "Skipping language model provider excluded by provider policy");
            return false;
        }
        self.lm_providers.insert(id, provider);
        true
    }

    /// 注册嵌入模型提供商
    pub fn register_embedding_model(&mut self, provider: Arc<dyn EmbeddingsProvider>) -> bool {
        let id = provider.info().id;
        if !self.provider_permitted(&id) {
            tracing::info!(provider = %id, "Skipping embedding provider excluded by provider policy");
            return false;
        }
        self.em_providers.insert(id, provider);
        true
    }

    pub fn lm_provider(&self, provider_id: &str) -> Option<Arc<dyn LanguageModelProvider>> {
        self.lm_providers.get(provider_id).cloned()
    }

    pub fn em_provider(&self, provider_id: &str) -> Option<Arc<dyn EmbeddingsProvider>> {
        self.em_providers.get(provider_id).cloned()
    }

    /// 根据全局模型ID获取语言模型提供商
    ///
    /// ## 参数说明
    /// - `global_id`: `provider:model`格式的模型ID，如`cloudera:llama-3-8b`
    ///
    /// ## 返回值
    /// - `Ok((provider, local_model_id))`: 提供商及其本地模型ID
    /// - `Err(AppError::ProviderNotFound)`: 格式错误、提供商不存在或该提供商无此模型
    pub fn language_model(&self, global_id: &str) -> Result<(Arc<dyn LanguageModelProvider>, String), AppError> {
        let (provider_id, model) = split_model_id(global_id)
            .ok_or_else(|| AppError::provider_not_found(format!("Invalid model id '{}'", global_id)))?;
        let provider = self.lm_provider(provider_id).ok_or_else(|| {
            AppError::provider_not_found(format!("No language model provider '{}'", provider_id))
        })?;
        if !provider.info().models.iter().any(|m| m == model) {
            return Err(AppError::provider_not_found(format!(
                "Provider '{}' has no model '{}'",
                provider_id, model
            )));
        }
        Ok((provider, model.to_string()))
    }

    /// 根据全局模型ID获取嵌入模型提供商
    pub fn embedding_model(&self, global_id: &str) -> Result<(Arc<dyn EmbeddingsProvider>, String), AppError> {
        let (provider_id, model) = split_model_id(global_id)
            .ok_or_else(|| AppError::provider_not_found(format!("Invalid model id '{}'", global_id)))?;
        let provider = self.em_provider(provider_id).ok_or_else(|| {
            AppError::provider_not_found(format!("No embedding provider '{}'", provider_id))
        })?;
        if !provider.info().models.iter().any(|m| m == model) {
            return Err(AppError::provider_not_found(format!(
                "Provider '{}' has no model '{}'",
                provider_id, model
            )));
        }
        Ok((provider, model.to_string()))
    }

    /// 列出语言模型提供商
    ///
    /// ## 内部实现逻辑
    /// 1. 只保留Cloudera和Bedrock类提供商
    /// 2. Bedrock类提供商只保留目录文件`thirdPartyModels`中启用的模型
    /// 3. chat_models / completion_models 限制在启用的模型之内
    /// 4. 应用模型级别的允许/屏蔽列表，丢弃没有剩余模型的提供商
    /// 5. 按名称排序
    pub fn list_language_providers(
        &self,
        third_party_models: &[String],
        policy: &ModelPolicy,
    ) -> Vec<ListProvidersEntry> {
        let providers = self
            .lm_providers
            .values()
            .map(|provider| provider.info())
            .filter(|info| is_listed_provider(&info.id))
            .map(|info| {
                let enabled = enabled_models(&info, third_party_models);
                let restrict = |models: &[String]| -> Vec<String> {
                    models.iter().filter(|m| enabled.contains(m)).cloned().collect()
                };
                ListProvidersEntry {
                    chat_models: Some(restrict(&info.chat_models)),
                    completion_models: Some(restrict(&info.completion_models)),
                    id: info.id,
                    name: info.name,
                    models: enabled.clone(),
                    help: info.help,
                    auth_strategy: info.auth_strategy,
                    registry: info.registry,
                    fields: info.fields,
                    model_id_label: info.model_id_label,
                }
            })
            .collect();

        sort_by_name(policy.filter(providers))
    }

    /// 列出嵌入模型提供商（规则同上，但不包含chat/completion模型列表）
    pub fn list_embedding_providers(
        &self,
        third_party_models: &[String],
        policy: &ModelPolicy,
    ) -> Vec<ListProvidersEntry> {
        let providers = self
            .em_providers
            .values()
            .map(|provider| provider.info())
            .filter(|info| is_listed_provider(&info.id))
            .map(|info| ListProvidersEntry {
                models: enabled_models(&info, third_party_models),
                id: info.id,
                name: info.name,
                chat_models: None,
                completion_models: None,
                help: None,
                auth_strategy: info.auth_strategy,
                registry: info.registry,
                fields: info.fields,
                model_id_label: None,
            })
            .collect();

        sort_by_name(policy.filter(providers))
    }

    pub fn get_provider_ids(&self) -> Vec<String> {
        self.lm_providers
            .keys()
            .chain(self.em_providers.keys())
            .cloned()
            .collect()
    }
}

fn enabled_models(info: &ProviderInfo, third_party_models: &[String]) -> Vec<String> {
    if is_third_party(&info.id) {
        info.models
            .iter()
            .filter(|m| third_party_models.contains(m))
            .cloned()
            .collect()
    } else {
        info.models.clone()
    }
}

fn sort_by_name(mut providers: Vec<ListProvidersEntry>) -> Vec<ListProvidersEntry> {
    providers.sort_by(|a, b| a.name.cmp(&b.name));
    providers
}

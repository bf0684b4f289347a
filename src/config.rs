use serde::{Deserialize, Serialize};
use figment::{Figment, providers::{Env, Format, Serialized, Toml}};
use std::path::{Path, PathBuf};
use anyhow::{Context, Result};

use crate::providers::embedding::ApiSyntax;

/// 模型目录文件路径的环境变量（沿用原名，实际指向一个JSON文件）
pub const COPILOT_CONFIG_ENV: &str = "COPILOT_CONFIG_DIR";

/// 服务自身配置的环境变量前缀
pub const ENV_PREFIX: &str = "COPILOT_SERVER_";

/// 主配置结构体
///
/// 包含Copilot后端的所有配置信息，从默认值、配置文件和环境变量依次合并加载
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// HTTP服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 推理网关相关配置（模型目录、JWT路径等）
    #[serde(default)]
    pub copilot: CopilotConfig,
    /// 模型/提供商级别的允许与屏蔽列表
    #[serde(default)]
    pub models: ModelPolicyConfig,
    /// 聊天配置
    #[serde(default)]
    pub chat: ChatConfig,
    /// 全局设置持久化配置
    #[serde(default)]
    pub state: StateConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 安全配置
    #[serde(default)]
    pub security: SecurityConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CopilotConfig {
    /// Path to the Copilot model catalog (JSON).
    #[serde(default = "default_catalog_path")]
    pub config_path: Option<PathBuf>,
    /// Cached session JWT written by the platform.
    #[serde(default = "default_jwt_path")]
    pub jwt_path: PathBuf,
    #[serde(default)]
    pub embedding_api_syntax: ApiSyntax,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ModelPolicyConfig {
    /// Global model ids (`provider:model`) that may be listed.
    #[serde(default)]
    pub allowed_models: Option<Vec<String>>,
    /// Global model ids (`provider:model`) that must never be listed.
    #[serde(default)]
    pub blocked_models: Option<Vec<String>>,
    #[serde(default)]
    pub allowed_providers: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_providers: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ChatConfig {
    /// Number of previous human/AI exchanges sent along with a prompt.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Directory `/learn` paths are resolved against.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct StateConfig {
    /// Where the global model selection is persisted; in-memory when unset.
    #[serde(default)]
    pub settings_path: Option<PathBuf>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SecurityConfig {
    /// Shared token required on REST and websocket requests when set.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_cors_enabled")]
    pub cors_enabled: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

// Default value functions
fn default_host() -> String { "127.0.0.1".to_string() }
fn default_port() -> u16 { 8888 }
fn default_request_timeout() -> u64 { 120 }
fn default_catalog_path() -> Option<PathBuf> {
    std::env::var(COPILOT_CONFIG_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}
fn default_jwt_path() -> PathBuf { PathBuf::from("/tmp/jwt") }
fn default_history_window() -> usize { 2 }
fn default_root_dir() -> PathBuf { PathBuf::from(".") }
fn default_chunk_size() -> usize { 2000 }
fn default_chunk_overlap() -> usize { 100 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_cors_enabled() -> bool { false }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            config_path: default_catalog_path(),
            jwt_path: default_jwt_path(),
            embedding_api_syntax: ApiSyntax::default(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            root_dir: default_root_dir(),
            user_name: None,
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token: None,
            cors_enabled: default_cors_enabled(),
            allowed_origins: Vec::new(),
        }
    }
}

/// 加载配置文件和环境变量
///
/// ## 功能说明
/// 依次合并内置默认值、TOML配置文件和以`COPILOT_SERVER_`为前缀的环境变量，
/// 后者覆盖前者。嵌套字段使用双下划线分隔，例如`COPILOT_SERVER_SERVER__PORT`
///
/// ## 内部实现逻辑
/// 1. 使用`Config::default()`作为基础层（其中模型目录路径取自`COPILOT_CONFIG_DIR`）
/// 2. 合并指定路径的TOML文件（文件不存在时跳过）
/// 3. 合并环境变量覆盖
/// 4. 反序列化并调用validate()验证
///
/// ## 执行例子
/// ```rust,no_run
/// let config = copilot_server::load_config(std::path::Path::new("config.toml"))?;
/// println!("Server will run on {}:{}", config.server.host, config.server.port);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {} or environment variables", path.display()))?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

impl Config {
    /// 验证整个配置的有效性
    ///
    /// 逐个验证各子配置，并为每个失败附加所属配置段的上下文
    pub fn validate(&self) -> Result<()> {
        self.server.validate()
            .context("Server configuration validation failed")?;

        self.copilot.validate()
            .context("Copilot configuration validation failed")?;

        self.models.validate()
            .context("Model policy validation failed")?;

        self.chat.validate()
            .context("Chat configuration validation failed")?;

        self.logging.validate()
            .context("Logging configuration validation failed")?;

        self.security.validate()
            .context("Security configuration validation failed")?;

        Ok(())
    }
}

impl ServerConfig {
    /// 验证服务器配置参数
    ///
    /// ## 参数验证规则
    /// - `host`: 不能为空字符串
    /// - `port`: 必须大于0
    /// - `request_timeout_seconds`: 1-600秒之间（推理请求可能较慢）
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        if self.request_timeout_seconds > 600 {
            return Err(anyhow::anyhow!("Request timeout cannot exceed 600 seconds"));
        }

        Ok(())
    }
}

impl CopilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.jwt_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("JWT path cannot be empty"));
        }

        // A missing catalog file is allowed: no Cloudera models are offered then.
        if let Some(path) = &self.config_path {
            if path.as_os_str().is_empty() {
                return Err(anyhow::anyhow!("Model catalog path cannot be empty if specified"));
            }
        }

        Ok(())
    }
}

impl ModelPolicyConfig {
    /// 验证允许/屏蔽列表
    ///
    /// ## 参数验证规则
    /// - 模型级允许列表和屏蔽列表不能同时设置
    /// - 提供商级允许列表和屏蔽列表不能同时设置
    /// - 模型ID必须是`provider:model`格式
    pub fn validate(&self) -> Result<()> {
        if self.allowed_models.is_some() && self.blocked_models.is_some() {
            return Err(anyhow::anyhow!("allowed_models and blocked_models cannot both be set"));
        }

        if self.allowed_providers.is_some() && self.blocked_providers.is_some() {
            return Err(anyhow::anyhow!("allowed_providers and blocked_providers cannot both be set"));
        }

        let model_lists = self.allowed_models.iter().chain(self.blocked_models.iter());
        for model_id in model_lists.flatten() {
            match model_id.split_once(':') {
                Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {}
                _ => {
                    return Err(anyhow::anyhow!(
                        "Invalid model id '{}': expected '<provider>:<model>'",
                        model_id
                    ));
                }
            }
        }

        Ok(())
    }
}

impl ChatConfig {
    /// 验证聊天配置参数
    ///
    /// ## 参数验证规则
    /// - `history_window`: 不超过50轮
    /// - `chunk_size`: 大于0
    /// - `chunk_overlap`: 必须小于`chunk_size`
    pub fn validate(&self) -> Result<()> {
        if self.history_window > 50 {
            return Err(anyhow::anyhow!("History window cannot exceed 50 exchanges"));
        }

        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.chunk_overlap >= self.chunk_size {
            return Err(anyhow::anyhow!("Chunk overlap must be smaller than chunk size"));
        }

        if let Some(name) = &self.user_name {
            if name.trim().is_empty() {
                return Err(anyhow::anyhow!("Chat user name cannot be blank if specified"));
            }
        }

        Ok(())
    }
}

impl LoggingConfig {
    /// 验证日志配置参数
    ///
    /// ## 参数验证规则
    /// - `level`: 必须是 "trace", "debug", "info", "warn", "error" 之一
    /// - `format`: 必须是 "json", "pretty", "compact" 之一
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}': must be one of {:?}",
                self.level, valid_levels
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}': must be one of {:?}",
                self.format, valid_formats
            ));
        }

        Ok(())
    }
}

impl SecurityConfig {
    /// 验证安全配置参数
    ///
    /// ## 参数验证规则
    /// - `token`: 如果设置，至少16个字符
    /// - `allowed_origins`: 如果CORS启用，源地址必须是"*"或有效的URL
    pub fn validate(&self) -> Result<()> {
        if let Some(token) = &self.token {
            if token.len() < 16 {
                return Err(anyhow::anyhow!("Security token must be at least 16 characters long"));
            }
        }

        if self.cors_enabled {
            for origin in &self.allowed_origins {
                if origin.is_empty() {
                    return Err(anyhow::anyhow!("Allowed origin cannot be empty"));
                }

                if origin != "*" && !origin.starts_with("http://") && !origin.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "Allowed origin '{}' must be '*' or start with http:// or https://",
                        origin
                    ));
                }
            }
        }

        Ok(())
    }
}

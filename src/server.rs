use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
};
use futures::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth::{JwtFileTokenSource, TokenSource},
    chat::{
        ChatHistory, ChatHub, ChatServices, EmbeddingIndex, IndexRetriever, RoutingType, builtin_handlers, get_chat_user,
    },
    config::Config,
    config_manager::{ConfigManager, DescribeConfigResponse, UpdateConfigRequest},
    discovery::configured_third_party_models,
    errors::{AppError, AppResult},
    middleware::{request_id_middleware, token_auth_middleware},
    providers::{
        ListProvidersEntry, ModelPolicy, ProviderRegistry, embedding::ClouderaEmbeddingProvider,
        inference::ClouderaInferenceProvider,
    },
    usage::UsageTracker,
};

/// 应用程序状态 - 在所有请求处理器之间共享
///
/// 包含配置、提供商注册表、全局配置管理器和聊天中心
#[derive(Clone)]
pub struct AppState {
    /// 应用程序配置（只读共享）
    pub config: Arc<Config>,
    /// 提供商注册表，管理所有模型提供商
    pub registry: Arc<ProviderRegistry>,
    /// 用户选择的模型与API密钥
    pub config_manager: Arc<ConfigManager>,
    /// 聊天websocket中心
    pub hub: Arc<ChatHub>,
}

impl AppState {
    /// Create application state with the Cloudera providers built from the
    /// Copilot model catalog
    pub fn new(config: Config) -> AppResult<Self> {
        // Create HTTP client with connection pooling
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.server.request_timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let token_source: Arc<dyn TokenSource> = Arc::new(JwtFileTokenSource::new(&config.copilot.jwt_path));
        let catalog_path = config.copilot.config_path.as_deref();

        let mut registry = ProviderRegistry::new(&config.models);
        registry.register_language_model(Arc::new(ClouderaInferenceProvider::from_catalog(
            catalog_path,
            http_client.clone(),
            token_source.clone(),
        )?));
        registry.register_embedding_model(Arc::new(ClouderaEmbeddingProvider::from_catalog(
            catalog_path,
            http_client,
            token_source,
            config.copilot.embedding_api_syntax,
        )?));

        Self::with_registry(config, registry)
    }

    /// Create application state around an already populated registry
    pub fn with_registry(config: Config, registry: ProviderRegistry) -> AppResult<Self> {
        Self::with_registry_and_usage(config, registry, UsageTracker::default())
    }

    /// Same as `with_registry`, reporting usage events to `usage`
    pub fn with_registry_and_usage(
        config: Config,
        registry: ProviderRegistry,
        usage: UsageTracker,
    ) -> AppResult<Self> {
        let registry = Arc::new(registry);
        let config_manager = Arc::new(ConfigManager::load(
            config.state.settings_path.as_deref(),
            registry.clone(),
        )?);

        let index = Arc::new(EmbeddingIndex::new());
        let services = ChatServices {
            config_manager: config_manager.clone(),
            usage,
            retriever: Arc::new(IndexRetriever::new(index.clone(), config_manager.clone())),
            index,
            chat: config.chat.clone(),
        };
        let hub = ChatHub::new(services, builtin_handlers());

        Ok(Self {
            config: Arc::new(config),
            registry,
            config_manager,
            hub,
        })
    }
}

/// Create the main application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/ai/chats", get(chat_websocket_handler))
        .route("/api/ai/chats/history", get(chat_history_handler))
        .route("/api/ai/chats/slash_commands", get(slash_commands_handler))
        .route("/api/ai/providers", get(list_providers_handler))
        .route("/api/ai/providers/embeddings", get(list_embedding_providers_handler))
        .route("/api/ai/config", get(get_config_handler).post(update_config_handler))
        .route("/api/ai/api_keys/{name}", delete(delete_api_key_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), token_auth_middleware));

    let cors = cors_layer(&state.config);

    let app = Router::new()
        .merge(api)
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http()),
        );

    match cors {
        Some(cors) => app.layer(cors),
        None => app,
    }
}

fn cors_layer(config: &Config) -> Option<CorsLayer> {
    if !config.security.cors_enabled {
        return None;
    }
    let allowed = &config.security.allowed_origins;
    let origin = if allowed.iter().any(|origin| origin == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };
    Some(CorsLayer::new().allow_origin(origin).allow_methods(Any).allow_headers(Any))
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> AppResult<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let app_state = AppState::new(config)?;
    let app = create_app(app_state);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    tracing::info!("Copilot server starting on {}", addr);
    tracing::info!("Available endpoints:");
    tracing::info!("  GET    /api/ai/chats - Chat websocket");
    tracing::info!("  GET    /api/ai/chats/history - Chat history");
    tracing::info!("  GET    /api/ai/chats/slash_commands - Available slash commands");
    tracing::info!("  GET    /api/ai/providers - Language model providers");
    tracing::info!("  GET    /api/ai/providers/embeddings - Embedding model providers");
    tracing::info!("  GET    /api/ai/config - Read global config");
    tracing::info!("  POST   /api/ai/config - Update global config");
    tracing::info!("  DELETE /api/ai/api_keys/{{name}} - Delete an API key");
    tracing::info!("  GET    /health - System health check");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| AppError::internal("server error", json!({ "error": e.to_string() })))?;

    tracing::info!("Copilot server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

// Request Handlers

/// Upgrade to the chat websocket
async fn chat_websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut incoming) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let user = get_chat_user(state.config.chat.user_name.as_deref());
    let client_id = state.hub.connect(user, tx).await;

    // ends once the hub drops the client's sender
    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(WsMessage::Close(None)).await;
    });

    while let Some(frame) = incoming.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let _ = state.hub.handle_incoming(&client_id, text.as_str()).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(client_id = %client_id, error = %e, "Websocket receive failed");
                break;
            }
        }
    }

    state.hub.disconnect(&client_id).await;
    if tokio::time::timeout(Duration::from_secs(5), &mut writer).await.is_err() {
        tracing::warn!(client_id = %client_id, "Websocket writer did not finish");
        writer.abort();
    }
}

async fn chat_history_handler(State(state): State<AppState>) -> Json<ChatHistory> {
    Json(state.hub.history().await)
}

#[derive(Debug, Serialize)]
struct SlashCommandEntry {
    slash_id: String,
    description: String,
}

/// List slash commands usable with the selected language model
async fn slash_commands_handler(State(state): State<AppState>) -> Json<Value> {
    let Some(provider) = state.config_manager.lm_provider().await else {
        return Json(json!({ "slash_commands": [] }));
    };

    let mut slash_commands: Vec<SlashCommandEntry> = state
        .hub
        .handlers()
        .filter_map(|(_, handler)| match handler.routing_type() {
            RoutingType::SlashCommand { slash_id } => Some((slash_id, handler)),
            RoutingType::Default => None,
        })
        .filter(|(slash_id, _)| !provider.unsupported_slash_commands.contains(&format!("/{}", slash_id)))
        .map(|(slash_id, handler)| SlashCommandEntry {
            slash_id,
            description: handler.help().to_string(),
        })
        .collect();
    slash_commands.sort_by(|a, b| a.slash_id.cmp(&b.slash_id));

    Json(json!({ "slash_commands": slash_commands }))
}

fn third_party_models(state: &AppState) -> AppResult<Vec<String>> {
    configured_third_party_models(state.config.copilot.config_path.as_deref())
}

async fn list_providers_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let policy = ModelPolicy::from(&state.config.models);
    let providers: Vec<ListProvidersEntry> =
        state.registry.list_language_providers(&third_party_models(&state)?, &policy);
    tracing::debug!(count = providers.len(), "Listing language model providers");
    Ok(Json(json!({ "providers": providers })))
}

async fn list_embedding_providers_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    let policy = ModelPolicy::from(&state.config.models);
    let providers = state
        .registry
        .list_embedding_providers(&third_party_models(&state)?, &policy);
    tracing::debug!(count = providers.len(), "Listing embedding model providers");
    Ok(Json(json!({ "providers": providers })))
}

async fn get_config_handler(State(state): State<AppState>) -> Json<DescribeConfigResponse> {
    Json(state.config_manager.get_config().await)
}

async fn update_config_handler(
    State(state): State<AppState>,
    Json(request): Json<UpdateConfigRequest>,
) -> AppResult<StatusCode> {
    state.config_manager.update_config(request).await.inspect_err(|e| {
        tracing::error!(error = %e, "Failed to update global config");
    })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_api_key_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<StatusCode> {
    state.config_manager.delete_api_key(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Handle system health check
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "copilot-server",
        "version": env!("CARGO_PKG_VERSION"),
        "providers_configured": state.registry.get_provider_ids().len(),
        "connected_clients": state.hub.client_count().await,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

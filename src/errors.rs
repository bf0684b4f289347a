use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// User-facing messages shown by the Copilot UI.
pub mod messages {
    pub const INTERNAL_ERROR: &str =
        "Internal error in Cloudera Copilot. Please contact Cloudera Support if the issue persists.";
    pub const MODEL_NOT_CONFIGURED: &str =
        "The model is not configured for Cloudera Copilot. Please choose a different model.";
    pub const MODEL_RESPONSE_ERROR: &str = "The Cloudera AI Inference model returned an unexpected response. Please ensure the model is running with enough resources and is configured properly in Copilot.";
    pub const MISSING_JWT: &str = "Unable to get user session JWT.";
    pub const REQUEST_FAILED: &str = "Request to Cloudera AI Inference Service failed.";
}

// Use anyhow::Result for internal error handling
// Use thiserror for well-typed errors that need to be handled specifically

/// Application-specific errors that need special handling
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{}", messages::MODEL_NOT_CONFIGURED)]
    ModelNotConfigured { model: String },

    /// The inference gateway answered, but not with what we expected.
    #[error("{} ({detail})", messages::MODEL_RESPONSE_ERROR)]
    ModelResponse { detail: Value },

    #[error("{} ({detail})", messages::INTERNAL_ERROR)]
    Internal { detail: Value },

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Provider error: {message}")]
    ProviderError { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request validation failed: {0}")]
    ValidationError(String),

    #[error("Write conflict: {0}")]
    WriteConflict(String),

    #[error("API key value cannot be empty: {0}")]
    KeyEmpty(String),
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn model_not_configured(model: impl Into<String>) -> Self {
        Self::ModelNotConfigured {
            model: model.into(),
        }
    }

    /// Build a response error with a `reason` plus any extra context fields.
    pub fn model_response(reason: &str, extra: Value) -> Self {
        Self::ModelResponse {
            detail: with_reason(reason, extra),
        }
    }

    pub fn internal(reason: &str, extra: Value) -> Self {
        Self::Internal {
            detail: with_reason(reason, extra),
        }
    }

    pub fn provider_not_found(msg: impl Into<String>) -> Self {
        Self::ProviderNotFound(msg.into())
    }

    pub fn provider_error(status: u16, message: impl Into<String>) -> Self {
        Self::ProviderError {
            status,
            message: message.into(),
        }
    }

    /// The `reason` recorded in the error detail, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            AppError::ModelResponse { detail } | AppError::Internal { detail } => {
                detail.get("reason").and_then(Value::as_str)
            }
            _ => None,
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::ProviderNotFound(_) => StatusCode::NOT_FOUND,
            AppError::WriteConflict(_) => StatusCode::CONFLICT,
            AppError::ProviderError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            AppError::ModelNotConfigured { .. }
            | AppError::ModelResponse { .. }
            | AppError::Internal { .. }
            | AppError::ConfigError(_)
            | AppError::KeyEmpty(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_request_error",
            AppError::ModelNotConfigured { .. } => "model_not_configured",
            AppError::ModelResponse { .. } => "model_response_error",
            AppError::Internal { .. } => "internal_error",
            AppError::ProviderNotFound(_) => "not_found",
            AppError::ProviderError { .. } => "provider_error",
            AppError::AuthenticationError(_) => "authentication_error",
            AppError::Forbidden(_) => "forbidden",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::WriteConflict(_) => "write_conflict",
            AppError::KeyEmpty(_) => "key_empty",
        }
    }
}

fn with_reason(reason: &str, extra: Value) -> Value {
    let mut detail = match extra {
        Value::Object(map) => Value::Object(map),
        Value::Null => json!({}),
        other => json!({ "context": other }),
    };
    detail["reason"] = Value::String(reason.to_string());
    detail
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        }));

        (status, body).into_response()
    }
}

/// Convert from anyhow::Error to AppError for error context
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the full error chain for debugging
        tracing::error!("Application error: {:?}", err);
        AppError::internal("unexpected error", json!({ "error": err.to_string() }))
    }
}

/// Helper type for results that use anyhow for error handling
pub type AppResult<T> = Result<T, AppError>;

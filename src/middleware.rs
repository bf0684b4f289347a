use std::{collections::HashMap, time::Instant};

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::{errors::AppError, server::AppState};

/// Request ID header name
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request ID middleware
///
/// Reuses an incoming `x-request-id` or generates one, runs the request
/// inside an `http_request` span and echoes the id on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    let method = request.method().clone();
    let uri = request.uri().path().to_string();
    let span = tracing::info_span!("http_request", request_id = %request_id, method = %method, uri = %uri);

    let start = Instant::now();
    let mut response = next.run(request).instrument(span.clone()).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    let status = response.status();
    span.in_scope(|| {
        if status.is_success() || status.is_informational() {
            info!(status = status.as_u16(), duration_ms, "Request completed");
        } else {
            warn!(status = status.as_u16(), duration_ms, "Request completed with error status");
        }
    });

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, header_value);
    }

    response
}

/// Token carried by `Authorization: token <t>` or `Authorization: Bearer <t>`
fn header_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get("authorization")?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Token authentication middleware
///
/// Without a configured `security.token` every request passes. Otherwise
/// the token must arrive in the `Authorization` header or the `token`
/// query parameter, which browsers use for websockets.
pub async fn token_auth_middleware(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config.security.token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let provided = header_token(request.headers()).or_else(|| params.get("token").map(String::as_str));
    if provided != Some(expected) {
        warn!(uri = %request.uri().path(), "Rejected request with missing or invalid token");
        return Err(AppError::Forbidden("Invalid or missing token".to_string()));
    }

    Ok(next.run(request).await)
}

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use crate::server::error::ApiError;
use crate::state::{AdminCredentials, AppState};

/// Decodes `Authorization: Basic <base64(user:password)>`.
fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = value
        .strip_prefix("Basic ")
        .or_else(|| value.strip_prefix("basic "))?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

fn is_authorized(headers: &HeaderMap, expected: &AdminCredentials) -> bool {
    match basic_credentials(headers) {
        Some((username, password)) => {
            constant_time_eq(username.as_bytes(), expected.username.as_bytes())
                & constant_time_eq(password.as_bytes(), expected.password.as_bytes())
        }
        None => false,
    }
}

pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.settings.admin.as_ref() else {
        return Err(ApiError::NotFound("Admin interface is disabled".to_string()));
    };
    if !is_authorized(request.headers(), expected) {
        warn!("Rejected admin request to {}", request.uri().path());
        return Err(ApiError::Unauthorized("Authentication required".to_string()));
    }
    Ok(next.run(request).await)
}

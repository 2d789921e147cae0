use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Path, State};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::catalog::{ModelDefinition, StyleDefinition};
use crate::pipeline::{MergeError, MergeOutcome, MergeRequest};
use crate::server::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::storage::{LogEntry, SessionMetadata};
use crate::utils::timing::{complete_request_timer, start_request_timer};

/// Caller address and user agent, taken from `X-Forwarded-For` or the socket.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub address: String,
    pub user_agent: String,
}

impl<S: Send + Sync> FromRequestParts<S> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let address = forwarded
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientInfo {
            address,
            user_agent,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MergeBody {
    #[serde(default)]
    pub image1: Option<String>,
    #[serde(default)]
    pub image2: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

pub async fn merge_images(
    State(state): State<AppState>,
    client: ClientInfo,
    body: Result<Json<MergeBody>, JsonRejection>,
) -> ApiResult<Json<MergeOutcome>> {
    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;

    let mut timer = start_request_timer(
        "merge",
        &client.address,
        body.style.as_deref(),
        body.model.as_deref(),
    );
    let request = MergeRequest {
        image1: body.image1,
        image2: body.image2,
        style: body.style,
        model: body.model,
        client_address: client.address,
        user_agent: client.user_agent,
    };

    match state.pipeline.run(&request).await {
        Ok(outcome) => {
            complete_request_timer(
                &mut timer,
                "success",
                Some(format!("session={}", outcome.meta.session_id)),
            );
            Ok(Json(outcome))
        }
        Err(err) => {
            let status = match err {
                MergeError::Validation(_) => "rejected",
                _ => "error",
            };
            complete_request_timer(&mut timer, status, Some(format!("{}: {}", err.kind(), err)));
            Err(err.into())
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StylesResponse {
    pub styles: Vec<StyleDefinition>,
    pub default_style: String,
}

pub async fn list_styles(State(state): State<AppState>) -> Json<StylesResponse> {
    let catalog = state.pipeline.catalog();
    Json(StylesResponse {
        styles: catalog.styles().to_vec(),
        default_style: catalog.default_style().key.clone(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsResponse {
    pub models: Vec<ModelDefinition>,
    pub default_model: String,
}

pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let catalog = state.pipeline.catalog();
    Json(ModelsResponse {
        models: catalog.models().to_vec(),
        default_model: catalog.default_model().key.clone(),
    })
}

pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLogEntry {
    #[serde(flatten)]
    pub entry: LogEntry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SessionMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_image: Option<String>,
}

pub async fn list_logs(State(state): State<AppState>) -> ApiResult<Json<Vec<AdminLogEntry>>> {
    let entries = state.activity_log.read_all().await?;
    let mut enriched = Vec::with_capacity(entries.len());

    for entry in entries.into_iter().rev() {
        let session = match state
            .sessions
            .load_session(&entry.session_directory_name)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    "Failed to load session '{}': {:#}",
                    entry.session_directory_name, err
                );
                None
            }
        };
        let (metadata, result_image) = match session {
            Some(session) => {
                let result_image = session.result_image_path.or(session.result_image_url);
                (Some(session.metadata), result_image)
            }
            None => (None, None),
        };
        enriched.push(AdminLogEntry {
            entry,
            metadata,
            result_image,
        });
    }

    Ok(Json(enriched))
}

/// Removes the session directory first, then the log entry, so a failed
/// directory delete leaves the entry in place and the call can be retried.
pub async fn delete_log(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<Json<JsonValue>> {
    let entry = state
        .activity_log
        .read_all()
        .await?
        .into_iter()
        .find(|entry| entry.session_id == session_id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {session_id} not found")))?;

    let directory_removed = state
        .sessions
        .delete_session(&entry.session_directory_name)
        .await
        .map_err(|err| {
            ApiError::Internal(format!(
                "Failed to delete session directory '{}': {:#}",
                entry.session_directory_name, err
            ))
        })?;
    if !directory_removed {
        warn!(
            "Session directory '{}' was already gone",
            entry.session_directory_name
        );
    }

    state.activity_log.delete(&session_id).await?;
    info!(
        "Deleted session {} (directory removed: {})",
        session_id, directory_removed
    );

    Ok(Json(json!({
        "deleted": true,
        "sessionId": session_id,
        "directoryRemoved": directory_removed,
    })))
}

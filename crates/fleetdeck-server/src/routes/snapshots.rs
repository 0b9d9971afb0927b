//! Database snapshots
//!
//! Script failures come back as `200` with `success: false` and the
//! script's stderr; invalid input is rejected with `400` before any script
//! runs.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, State};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use fleetdeck_core::CoreError;
use fleetdeck_kube::{SHARED_SOURCE, ScriptOutcome, StagedUpload};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({ "snapshots": state.snapshots.list(false).await }))
}

pub async fn list_named(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({ "snapshots": state.snapshots.list(true).await }))
}

pub async fn create(State(state): State<AppState>) -> ApiResult<Json<ScriptOutcome>> {
    Ok(Json(state.snapshots.create().await?))
}

#[derive(Debug, Deserialize)]
pub struct CreateNamedRequest {
    name: String,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    SHARED_SOURCE.to_string()
}

pub async fn create_named(
    State(state): State<AppState>,
    payload: Result<Json<CreateNamedRequest>, JsonRejection>,
) -> ApiResult<Json<ScriptOutcome>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.snapshots.create_named(&request.name, &request.source).await?))
}

pub async fn remove(State(state): State<AppState>, Path(filename): Path<String>) -> ApiResult<Json<ScriptOutcome>> {
    Ok(Json(state.snapshots.delete(&filename).await?))
}

#[derive(Debug, Deserialize)]
pub struct RestoreRequest {
    snapshot: String,
}

pub async fn restore(
    State(state): State<AppState>,
    payload: Result<Json<RestoreRequest>, JsonRejection>,
) -> ApiResult<Json<ScriptOutcome>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(state.snapshots.restore(&request.snapshot).await?))
}

#[derive(Debug, Deserialize)]
pub struct RestoreToDeploymentRequest {
    snapshot: String,
    namespace: String,
}

pub async fn restore_to_deployment(
    State(state): State<AppState>,
    payload: Result<Json<RestoreToDeploymentRequest>, JsonRejection>,
) -> ApiResult<Json<ScriptOutcome>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    Ok(Json(
        state
            .snapshots
            .restore_to_deployment(&request.snapshot, &request.namespace)
            .await?,
    ))
}

/// Multipart upload with a `file` part (a `.sql` dump) and a `name` field
///
/// The file part is streamed to disk chunk by chunk.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<ScriptOutcome>> {
    let mut name = None;
    let mut file = None;

    while let Some(mut field) = multipart.next_field().await? {
        match field.name() {
            Some("name") => name = Some(field.text().await?),
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let mut staged = StagedUpload::new()?;
                while let Some(chunk) = field.chunk().await? {
                    staged.write_chunk(&chunk).await?;
                }
                file = Some((filename, staged));
            }
            _ => {}
        }
    }

    let name = name.ok_or_else(|| CoreError::validation("name", "is required"))?;
    let (filename, content) = file.ok_or_else(|| CoreError::validation("file", "is required"))?;

    Ok(Json(state.snapshots.upload(&name, &filename, content).await?))
}

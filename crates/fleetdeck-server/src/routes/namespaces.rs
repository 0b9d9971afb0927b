//! Deployment namespaces: listing, deploy, removal and inspection

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderName, header};
use axum::response::IntoResponse;
use axum::response::sse::{Event, Sse};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};
use std::convert::Infallible;

use fleetdeck_core::{DeployRequest, PhaseResult};
use fleetdeck_kube::StreamEvent;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const DEFAULT_EVENT_LIMIT: usize = 50;
const DEFAULT_LOG_TAIL: i64 = 100;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<JsonValue>> {
    let deployments = state.manager.list_deployments().await?;
    Ok(Json(json!({ "versions": deployments })))
}

pub async fn deploy(
    State(state): State<AppState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<Json<JsonValue>> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let outcome = state.manager.deploy(&request).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Deployment initiated",
        "namespace": outcome.namespace,
        "url": outcome.url,
        "output": outcome.output,
    })))
}

#[derive(Debug, Deserialize)]
pub struct RemoveParams {
    #[serde(default = "default_wait")]
    wait: bool,
}

fn default_wait() -> bool {
    true
}

pub async fn remove(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(params): Query<RemoveParams>,
) -> ApiResult<Json<JsonValue>> {
    state.manager.delete(&namespace, params.wait).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Namespace {} removed", namespace),
    })))
}

pub async fn status(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<Json<JsonValue>> {
    let exists = state.manager.namespace_exists(&namespace).await?;
    Ok(Json(json!({ "exists": exists, "namespace": namespace })))
}

#[derive(Debug, Deserialize)]
pub struct EventParams {
    limit: Option<usize>,
}

pub async fn events(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(params): Query<EventParams>,
) -> ApiResult<Json<JsonValue>> {
    let limit = params.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    let events = state.manager.events(&namespace, limit).await?;
    Ok(Json(json!({ "events": events })))
}

pub async fn pods(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<Json<JsonValue>> {
    let pods = state.manager.pods(&namespace).await?;
    Ok(Json(json!({ "pods": pods })))
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pod: Option<String>,
    container: Option<String>,
    tail: Option<i64>,
}

pub async fn logs(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<JsonValue>> {
    // `?pod=` means all pods
    let pod = params.pod.as_deref().filter(|p| !p.is_empty());
    let container = params.container.as_deref().filter(|c| !c.is_empty());
    let tail = params.tail.unwrap_or(DEFAULT_LOG_TAIL);

    let logs = state.manager.logs(&namespace, pod, container, tail).await?;
    Ok(Json(json!({ "logs": logs })))
}

pub async fn config(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<Json<JsonValue>> {
    let config = state.manager.config(&namespace).await?;
    Ok(Json(json!({ "config": config })))
}

/// Polling fallback for clients without SSE
pub async fn phase(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<Json<PhaseResult>> {
    Ok(Json(state.manager.phase(&namespace).await?))
}

/// Live phase updates as server-sent events
///
/// The stream ends after the `complete` or `error` event. Disconnecting
/// drops the stream, which stops the underlying pod watch.
pub async fn stream(State(state): State<AppState>, Path(namespace): Path<String>) -> ApiResult<impl IntoResponse> {
    let events = state.manager.stream_phase(&namespace)?;
    tracing::debug!(namespace = %namespace, "Phase stream opened");

    let headers = [
        (header::CACHE_CONTROL, "no-cache"),
        (HeaderName::from_static("x-accel-buffering"), "no"),
    ];
    Ok((headers, Sse::new(sse_events(events))))
}

fn sse_events(
    events: impl Stream<Item = StreamEvent> + Send + 'static,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    events.map(|event| Ok(to_sse_event(&event)))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match event {
        StreamEvent::Heartbeat => Event::default().comment("heartbeat"),
        other => Event::default().event(other.name()).data(other.data().to_string()),
    }
}


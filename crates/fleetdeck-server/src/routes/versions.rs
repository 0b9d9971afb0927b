use axum::Json;
use axum::extract::State;
use serde_json::{Value as JsonValue, json};

use crate::state::AppState;

/// Upstream n8n versions, newest first
pub async fn available(State(state): State<AppState>) -> Json<JsonValue> {
    let versions = state.catalog.available_versions().await;
    Json(json!({ "versions": versions }))
}

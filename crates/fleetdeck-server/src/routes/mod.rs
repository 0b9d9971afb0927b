//! HTTP routes, all mounted under `/api`

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use tower_http::trace::TraceLayer;

use fleetdeck_kube::MAX_UPLOAD_BYTES;

use crate::cache_control::cache_control;
use crate::state::AppState;

mod cluster;
mod namespaces;
mod snapshots;
mod versions;

/// Room for the multipart framing around a maximum-size upload
const UPLOAD_BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_routes())
        .layer(middleware::from_fn(cache_control))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(cluster::health))
        .route("/versions/available", get(versions::available))
        .route("/cluster/resources", get(cluster::resources))
        .route("/infrastructure/status", get(cluster::infrastructure))
        .route("/namespaces", get(namespaces::list).post(namespaces::deploy))
        .route("/namespaces/{namespace}", delete(namespaces::remove))
        .route("/namespaces/{namespace}/status", get(namespaces::status))
        .route("/namespaces/{namespace}/events", get(namespaces::events))
        .route("/namespaces/{namespace}/events/stream", get(namespaces::stream))
        .route("/namespaces/{namespace}/pods", get(namespaces::pods))
        .route("/namespaces/{namespace}/logs", get(namespaces::logs))
        .route("/namespaces/{namespace}/config", get(namespaces::config))
        .route("/namespaces/{namespace}/phase", get(namespaces::phase))
        .route("/snapshots", get(snapshots::list))
        .route("/snapshots/named", get(snapshots::list_named))
        .route("/snapshots/create", post(snapshots::create))
        .route("/snapshots/create-named", post(snapshots::create_named))
        .route("/snapshots/restore", post(snapshots::restore))
        .route("/snapshots/restore-to-deployment", post(snapshots::restore_to_deployment))
        .route(
            "/snapshots/upload",
            post(snapshots::upload).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/snapshots/{filename}", delete(snapshots::remove))
}

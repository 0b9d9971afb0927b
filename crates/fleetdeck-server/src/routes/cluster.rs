//! Cluster-wide read endpoints. These never fail; problems are reported in
//! the body.

use axum::Json;
use axum::extract::State;

use fleetdeck_kube::{
    HealthReport, InfrastructureStatus, ResourceReport, cluster_health, cluster_resources, infrastructure_status,
};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(cluster_health(state.cluster.as_ref()).await)
}

pub async fn resources(State(state): State<AppState>) -> Json<ResourceReport> {
    Json(cluster_resources(state.cluster.as_ref(), state.deployment_selector()).await)
}

pub async fn infrastructure(State(state): State<AppState>) -> Json<InfrastructureStatus> {
    Json(infrastructure_status(state.cluster.as_ref(), &state.system_namespace).await)
}

//! Shared infrastructure health

use serde::{Deserialize, Serialize};

use fleetdeck_core::pod::PodPhase;

use crate::cluster::ClusterApi;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    /// `healthy` or `unavailable`
    pub status: String,
}

impl ComponentHealth {
    fn from_phase(phase: Option<PodPhase>) -> Self {
        let healthy = phase == Some(PodPhase::Running);
        Self {
            healthy,
            status: if healthy { "healthy" } else { "unavailable" }.to_string(),
        }
    }
}

/// Health of the components every deployment depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfrastructureStatus {
    pub redis: ComponentHealth,
    pub backup: ComponentHealth,
}

/// API server reachability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `ok` or `degraded`
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn infrastructure_status(cluster: &dyn ClusterApi, system_namespace: &str) -> InfrastructureStatus {
    InfrastructureStatus {
        redis: ComponentHealth::from_phase(first_pod_phase(cluster, system_namespace, "app=redis").await),
        backup: ComponentHealth::from_phase(
            first_pod_phase(cluster, system_namespace, "app=backup-storage").await,
        ),
    }
}

async fn first_pod_phase(cluster: &dyn ClusterApi, namespace: &str, selector: &str) -> Option<PodPhase> {
    match cluster.list_pods_by_label(namespace, selector).await {
        Ok(pods) => pods.first().map(|p| p.phase),
        Err(e) => {
            tracing::debug!(selector = %selector, "Failed to query infrastructure pods: {}", e);
            None
        }
    }
}

pub async fn cluster_health(cluster: &dyn ClusterApi) -> HealthReport {
    match cluster.ping().await {
        Ok(()) => HealthReport {
            status: "ok".to_string(),
            error: None,
        },
        Err(e) => {
            tracing::warn!("Kubernetes API unreachable: {}", e);
            HealthReport {
                status: "degraded".to_string(),
                error: Some("Cannot reach Kubernetes cluster".to_string()),
            }
        }
    }
}

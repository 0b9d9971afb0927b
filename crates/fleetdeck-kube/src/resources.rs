//! Cluster capacity estimation
//!
//! Capacity is judged from memory requests only: what the first node can
//! allocate against what every pod in the cluster has requested. The
//! result says whether another deployment of each mode still fits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use fleetdeck_core::DeployMode;
use fleetdeck_core::quantity::to_mebibytes;

use crate::cluster::{ClusterApi, NamespaceInfo, PodFootprint};
use crate::error::Result;

/// Memory a queue-mode deployment needs: main 512 + webhook 256 + 2 workers at 512
pub const QUEUE_MODE_MEMORY_MI: i64 = 1792;

/// Memory a regular-mode deployment needs: main only
pub const REGULAR_MODE_MEMORY_MI: i64 = 512;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub allocatable_mi: u64,
    pub used_mi: u64,
    /// Negative when the cluster is overcommitted
    pub available_mi: i64,
    pub utilization_percent: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanDeploy {
    pub queue_mode: bool,
    pub regular_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentUsage {
    pub namespace: String,
    pub memory_mi: u64,
    pub mode: DeployMode,
    pub age_seconds: i64,
}

/// Capacity report; `error` is set and everything else empty when the
/// cluster could not be queried
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub memory: Option<MemorySummary>,
    pub can_deploy: CanDeploy,
    pub deployments: Vec<DeploymentUsage>,
}

impl ResourceReport {
    pub fn unavailable(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            memory: None,
            can_deploy: CanDeploy::default(),
            deployments: Vec::new(),
        }
    }
}

/// Build a capacity report from raw cluster figures
///
/// `deployments` are the deployment namespaces; `footprints` cover every
/// pod in the cluster, so `used` includes system workloads too.
pub fn estimate(
    allocatable_bytes: u64,
    footprints: &[PodFootprint],
    deployments: &[NamespaceInfo],
    now: DateTime<Utc>,
) -> ResourceReport {
    let used_bytes: u64 = footprints.iter().map(|f| f.memory_request_bytes).sum();
    let allocatable_mi = to_mebibytes(allocatable_bytes);
    let used_mi = to_mebibytes(used_bytes);
    let available_mi = allocatable_mi as i64 - used_mi as i64;
    let utilization_percent = if allocatable_bytes == 0 {
        0
    } else {
        (used_bytes as f64 / allocatable_bytes as f64 * 100.0).round() as u64
    };

    let mut by_namespace: HashMap<&str, Vec<&PodFootprint>> = HashMap::new();
    for footprint in footprints {
        by_namespace.entry(&footprint.namespace).or_default().push(footprint);
    }

    let mut usage: Vec<DeploymentUsage> = deployments
        .iter()
        .map(|ns| {
            let pods = by_namespace.get(ns.name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            let queue = pods
                .iter()
                .any(|p| p.name.contains("worker") || p.name.contains("webhook"));
            DeploymentUsage {
                namespace: ns.name.clone(),
                memory_mi: to_mebibytes(pods.iter().map(|p| p.memory_request_bytes).sum()),
                mode: if queue { DeployMode::Queue } else { DeployMode::Regular },
                age_seconds: ns.age_seconds(now),
            }
        })
        .collect();
    usage.sort_by(|a, b| b.age_seconds.cmp(&a.age_seconds));

    ResourceReport {
        error: None,
        memory: Some(MemorySummary {
            allocatable_mi,
            used_mi,
            available_mi,
            utilization_percent,
        }),
        can_deploy: CanDeploy {
            queue_mode: available_mi >= QUEUE_MODE_MEMORY_MI,
            regular_mode: available_mi >= REGULAR_MODE_MEMORY_MI,
        },
        deployments: usage,
    }
}

/// Query the cluster and estimate capacity, degrading to an error report
pub async fn cluster_resources(cluster: &dyn ClusterApi, deployment_selector: &str) -> ResourceReport {
    match gather(cluster, deployment_selector).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("Failed to estimate cluster resources: {}", e);
            ResourceReport::unavailable(e.to_string())
        }
    }
}

async fn gather(cluster: &dyn ClusterApi, deployment_selector: &str) -> Result<ResourceReport> {
    let Some(allocatable) = cluster.allocatable_memory().await? else {
        return Ok(ResourceReport::unavailable("Failed to query cluster nodes"));
    };
    let footprints = cluster.pod_footprints().await?;
    let deployments = cluster.list_namespaces(Some(deployment_selector)).await?;
    Ok(estimate(allocatable, &footprints, &deployments, Utc::now()))
}

//! Deployment lifecycle
//!
//! `DeploymentManager` owns every operation on a deployment namespace:
//! installing it through the deploy script, tearing it down, and the
//! read-only views (pods, events, logs, config, phase, listing).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use fleetdeck_core::deploy::{access_url, version_from_namespace};
use fleetdeck_core::phase::{DeploymentPhase, PhaseResult, calculate_phase};
use fleetdeck_core::pod::PodObservation;
use fleetdeck_core::validate::{validate_identifier, validate_namespace};
use fleetdeck_core::{CoreError, DeployMode, DeployRequest};

use crate::cluster::{ClusterApi, EventRecord, NamespaceInfo};
use crate::error::{KubeError, Result};
use crate::release::{InstallArgs, ReleaseRunner, seeded_snapshot};

/// Config map key holding the execution mode
const EXECUTIONS_MODE_KEY: &str = "EXECUTIONS_MODE";

const NO_ERROR_MESSAGE: &str = "Deployment failed with no error message";

/// Timings and names used by the lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Label selector identifying deployment namespaces
    pub deployment_selector: String,
    /// Config map holding the n8n environment of a deployment
    pub config_map: String,
    pub delete_timeout: Duration,
    pub poll_interval: Duration,
    /// Server-side timeout of one pod watch; must stay below 295s
    pub watch_timeout_secs: u32,
    pub heartbeat: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            deployment_selector: "app=n8n".to_string(),
            config_map: "n8n-config".to_string(),
            delete_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            watch_timeout_secs: 290,
            heartbeat: Duration::from_secs(30),
        }
    }
}

/// Result of a deploy call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub namespace: String,
    pub url: Option<String>,
    /// stdout of the deploy script
    pub output: String,
}

/// Log tail of one pod; `error` is set instead of failing the whole request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBlock {
    pub pod: String,
    pub container: Option<String>,
    pub logs: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Running,
    Failed,
    Pending,
}

impl From<DeploymentPhase> for DeploymentStatus {
    fn from(phase: DeploymentPhase) -> Self {
        match phase {
            DeploymentPhase::Running => DeploymentStatus::Running,
            DeploymentPhase::Failed => DeploymentStatus::Failed,
            _ => DeploymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodCounts {
    pub ready: usize,
    pub total: usize,
}

/// One row of the deployment listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSummary {
    /// `X.Y.Z` recovered from the namespace, or `unknown`
    pub version: String,
    pub namespace: String,
    /// Set when the namespace does not follow the `n8n-vX-Y-Z` convention
    pub name: Option<String>,
    pub mode: DeployMode,
    pub status: DeploymentStatus,
    pub phase: DeploymentPhase,
    pub url: Option<String>,
    pub isolated_db: bool,
    /// Snapshot the database was seeded from
    pub snapshot: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub pods: PodCounts,
}

/// Deployment operations over the cluster and the release tool
#[derive(Clone)]
pub struct DeploymentManager {
    cluster: Arc<dyn ClusterApi>,
    releases: ReleaseRunner,
    settings: LifecycleSettings,
}

impl DeploymentManager {
    pub fn new(cluster: Arc<dyn ClusterApi>, releases: ReleaseRunner, settings: LifecycleSettings) -> Self {
        Self {
            cluster,
            releases,
            settings,
        }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Install a new deployment
    ///
    /// A failure mentioning both "namespace" and "already exists" comes from
    /// helm racing a namespace that is still terminating; the resources are
    /// created anyway, so it is reported as success.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeployOutcome> {
        let mode = request.validate()?;
        let namespace = request.namespace();
        tracing::info!(namespace = %namespace, version = %request.version, mode = %mode, "Deploying");

        let args = InstallArgs {
            version: &request.version,
            mode,
            name: request.name.as_deref(),
            snapshot: request.snapshot.as_deref(),
            values: request.helm_values.as_ref(),
        };
        let output = self.releases.install(&args).await?;

        if !output.success() {
            let message = output.error_text(NO_ERROR_MESSAGE);
            if is_terminating_namespace_race(&message) {
                tracing::warn!(
                    namespace = %namespace,
                    "Helm reported a namespace conflict but the deployment likely succeeded: {}",
                    message
                );
            } else {
                tracing::error!(namespace = %namespace, "Deployment failed: {}", message);
                return Err(KubeError::ToolFailed {
                    tool: "deploy-version.sh".to_string(),
                    message,
                    output: output.combined(),
                });
            }
        }

        Ok(DeployOutcome {
            url: access_url(&request.version),
            namespace,
            output: output.stdout,
        })
    }

    /// Uninstall the release and delete its namespace
    ///
    /// With `wait`, returns only once the namespace is gone, or fails with
    /// a timeout after `delete_timeout`.
    pub async fn delete(&self, namespace: &str, wait: bool) -> Result<()> {
        validate_namespace(namespace)?;
        if self.cluster.get_namespace(namespace).await?.is_none() {
            return Err(KubeError::NamespaceNotFound {
                namespace: namespace.to_string(),
            });
        }

        let uninstall = self.releases.uninstall(namespace).await?;
        if !uninstall.success() && !uninstall.stderr.to_lowercase().contains("not found") {
            tracing::warn!(namespace = %namespace, "Helm uninstall warning: {}", uninstall.stderr.trim());
        }

        if !self.cluster.delete_namespace(namespace).await? {
            tracing::debug!(namespace = %namespace, "Namespace already gone");
            return Ok(());
        }
        tracing::info!(namespace = %namespace, "Namespace deletion requested");

        if wait {
            self.wait_for_removal(namespace).await?;
        }
        Ok(())
    }

    async fn wait_for_removal(&self, namespace: &str) -> Result<()> {
        let deadline = Instant::now() + self.settings.delete_timeout;
        loop {
            if self.cluster.get_namespace(namespace).await?.is_none() {
                tracing::info!(namespace = %namespace, "Namespace removed");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(KubeError::Timeout("Namespace deletion timed out".to_string()));
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    pub async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        validate_namespace(namespace)?;
        Ok(self.cluster.get_namespace(namespace).await?.is_some())
    }

    /// Newest events first; a namespace without events yields an empty list
    pub async fn events(&self, namespace: &str, limit: usize) -> Result<Vec<EventRecord>> {
        validate_namespace(namespace)?;
        self.cluster.list_events(namespace, limit).await
    }

    pub async fn pods(&self, namespace: &str) -> Result<Vec<PodObservation>> {
        validate_namespace(namespace)?;
        self.cluster.list_pods(namespace).await
    }

    /// Log tails of one pod, or of every pod in the namespace
    pub async fn logs(
        &self,
        namespace: &str,
        pod: Option<&str>,
        container: Option<&str>,
        tail: i64,
    ) -> Result<Vec<LogBlock>> {
        validate_namespace(namespace)?;
        if let Some(pod) = pod {
            validate_identifier(pod, "pod")?;
        }
        if let Some(container) = container {
            validate_identifier(container, "container")?;
        }
        if tail < 1 {
            return Err(CoreError::validation("tail", "must be at least 1").into());
        }

        let pods = match pod {
            Some(pod) => vec![pod.to_string()],
            None => self
                .cluster
                .list_pods(namespace)
                .await?
                .into_iter()
                .map(|p| p.name)
                .collect(),
        };

        let mut blocks = Vec::with_capacity(pods.len());
        for pod in pods {
            let block = match self.cluster.pod_logs(namespace, &pod, container, tail).await {
                Ok(logs) => LogBlock {
                    pod,
                    container: container.map(str::to_string),
                    logs,
                    error: None,
                },
                Err(e) => {
                    tracing::debug!(namespace = %namespace, pod = %pod, "Failed to read logs: {}", e);
                    LogBlock {
                        pod,
                        container: container.map(str::to_string),
                        logs: String::new(),
                        error: Some(e.to_string()),
                    }
                }
            };
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Environment of the deployment; empty when the config map is absent
    pub async fn config(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        validate_namespace(namespace)?;
        self.cluster.config_map(namespace, &self.settings.config_map).await
    }

    pub async fn is_queue_mode(&self, namespace: &str) -> Result<bool> {
        let config = self.cluster.config_map(namespace, &self.settings.config_map).await?;
        Ok(config.get(EXECUTIONS_MODE_KEY).map(String::as_str) == Some("queue"))
    }

    /// Current phase of a deployment
    pub async fn phase(&self, namespace: &str) -> Result<PhaseResult> {
        validate_namespace(namespace)?;
        self.observe_phase(namespace).await
    }

    /// Recompute the phase from a fresh pod listing
    pub(crate) async fn observe_phase(&self, namespace: &str) -> Result<PhaseResult> {
        let pods = self.cluster.list_pods(namespace).await?;
        let queue = self.is_queue_mode(namespace).await?;
        Ok(calculate_phase(&pods, queue))
    }

    /// Every deployment namespace with its derived state
    pub async fn list_deployments(&self) -> Result<Vec<DeploymentSummary>> {
        let namespaces = self
            .cluster
            .list_namespaces(Some(&self.settings.deployment_selector))
            .await?;

        let summaries = futures::future::join_all(namespaces.iter().map(|ns| self.summarize(ns))).await;
        summaries.into_iter().collect()
    }

    async fn summarize(&self, ns: &NamespaceInfo) -> Result<DeploymentSummary> {
        let pods = self.cluster.list_pods(&ns.name).await?;
        let config = self.cluster.config_map(&ns.name, &self.settings.config_map).await?;
        let mode = resolve_mode(&config, &pods);
        let phase = calculate_phase(&pods, mode == DeployMode::Queue);

        let snapshot = match self.releases.release_values(&ns.name).await {
            Ok(values) => values.as_ref().and_then(seeded_snapshot),
            Err(e) => {
                tracing::debug!(namespace = %ns.name, "Could not read release values: {}", e);
                None
            }
        };

        let parsed_version = version_from_namespace(&ns.name);
        let url = parsed_version.as_deref().and_then(access_url);
        let name = parsed_version.is_none().then(|| ns.name.clone());

        Ok(DeploymentSummary {
            version: parsed_version.unwrap_or_else(|| "unknown".to_string()),
            namespace: ns.name.clone(),
            name,
            mode,
            status: phase.phase.into(),
            phase: phase.phase,
            url,
            isolated_db: true,
            snapshot,
            created_at: ns.created_at,
            pods: PodCounts {
                ready: pods.iter().filter(|p| p.is_ready_running()).count(),
                total: pods.len(),
            },
        })
    }
}

fn is_terminating_namespace_race(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("already exists") && lower.contains("namespace")
}

/// Mode from the config map, falling back to which pods exist
fn resolve_mode(config: &BTreeMap<String, String>, pods: &[PodObservation]) -> DeployMode {
    match config.get(EXECUTIONS_MODE_KEY).map(String::as_str) {
        Some("queue") => DeployMode::Queue,
        Some(_) => DeployMode::Regular,
        None if pods.iter().any(PodObservation::is_queue_component) => DeployMode::Queue,
        None => DeployMode::Regular,
    }
}

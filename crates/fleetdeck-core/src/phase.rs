//! Deployment phase engine
//!
//! Reduces a set of pod observations to one coarse lifecycle phase. The
//! checks run in a fixed order and the first match wins:
//!
//! 1. no pods at all
//! 2. any tracked pod failed
//! 3. database not ready
//! 4. main application not ready
//! 5. queue mode only: workers or webhook not ready
//! 6. running
//!
//! Failure is checked before progress so a crashing pod is never reported as
//! still starting. Later stages are only examined once earlier ones are ready,
//! which keeps the reported phase monotonic during a normal startup.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::pod::{PodObservation, PodPhase, PodRole};

/// Coarse lifecycle phase of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentPhase {
    DbStarting,
    N8nStarting,
    WorkersStarting,
    Running,
    Failed,
    Unknown,
}

impl DeploymentPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPhase::DbStarting => "db-starting",
            DeploymentPhase::N8nStarting => "n8n-starting",
            DeploymentPhase::WorkersStarting => "workers-starting",
            DeploymentPhase::Running => "running",
            DeploymentPhase::Failed => "failed",
            DeploymentPhase::Unknown => "unknown",
        }
    }

    /// Short human label shown next to the phase
    pub fn label(&self) -> &'static str {
        match self {
            DeploymentPhase::DbStarting => "DB starting",
            DeploymentPhase::N8nStarting => "n8n starting",
            DeploymentPhase::WorkersStarting => "Workers",
            DeploymentPhase::Running => "Running",
            DeploymentPhase::Failed => "Failed",
            DeploymentPhase::Unknown => "Unknown",
        }
    }

    /// Running and failed end an event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentPhase::Running | DeploymentPhase::Failed)
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a phase computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: DeploymentPhase,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_pod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_ready: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pods_total: Option<usize>,
}

impl PhaseResult {
    fn new(phase: DeploymentPhase) -> Self {
        Self {
            phase,
            label: phase.label().to_string(),
            message: None,
            failed_pod: None,
            reason: None,
            pods_ready: None,
            pods_total: None,
        }
    }

    fn with_message(phase: DeploymentPhase, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(phase)
        }
    }

    /// Phase reported when the cluster could not be observed
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::with_message(DeploymentPhase::Unknown, message)
    }
}

/// Pods grouped by role, each group in input order
#[derive(Default)]
struct RoleGroups<'a> {
    database: Vec<&'a PodObservation>,
    main: Vec<&'a PodObservation>,
    worker: Vec<&'a PodObservation>,
    webhook: Vec<&'a PodObservation>,
}

impl<'a> RoleGroups<'a> {
    fn from_pods(pods: &'a [PodObservation]) -> Self {
        let mut groups = Self::default();
        for pod in pods {
            match pod.role() {
                Some(PodRole::Database) => groups.database.push(pod),
                Some(PodRole::Main) => groups.main.push(pod),
                Some(PodRole::Worker) => groups.worker.push(pod),
                Some(PodRole::Webhook) => groups.webhook.push(pod),
                None => {}
            }
        }
        groups
    }

    /// Database, main, worker, webhook: the order failures are searched in
    fn tracked(&self) -> impl Iterator<Item = &'a PodObservation> + '_ {
        self.database
            .iter()
            .chain(&self.main)
            .chain(&self.worker)
            .chain(&self.webhook)
            .copied()
    }
}

/// Compute the deployment phase for one consistent snapshot of pods
pub fn calculate_phase(pods: &[PodObservation], is_queue_mode: bool) -> PhaseResult {
    if pods.is_empty() {
        return PhaseResult::with_message(DeploymentPhase::DbStarting, "Waiting for pods...");
    }

    let groups = RoleGroups::from_pods(pods);

    if let Some(failed) = groups.tracked().find(|p| p.is_failed()) {
        return PhaseResult {
            failed_pod: Some(failed.name.clone()),
            reason: Some(failed.failure_reason()),
            ..PhaseResult::new(DeploymentPhase::Failed)
        };
    }

    if !groups.database.iter().any(|p| p.is_ready_running()) {
        return PhaseResult::with_message(
            DeploymentPhase::DbStarting,
            progress_message(&groups.database, PodRole::Database),
        );
    }

    if !groups.main.iter().any(|p| p.is_ready_running()) {
        return PhaseResult::with_message(
            DeploymentPhase::N8nStarting,
            progress_message(&groups.main, PodRole::Main),
        );
    }

    if is_queue_mode {
        let workers_ready = groups.worker.iter().filter(|p| p.is_ready_running()).count();
        let workers_running = !groups.worker.is_empty() && workers_ready == groups.worker.len();
        let webhook_running = groups.webhook.iter().any(|p| p.is_ready_running());

        if !(workers_running && webhook_running) {
            return PhaseResult::with_message(
                DeploymentPhase::WorkersStarting,
                format!(
                    "Workers: {}/{}, Webhook: {}",
                    workers_ready,
                    groups.worker.len(),
                    if webhook_running { "ready" } else { "starting" }
                ),
            );
        }
    }

    let total = groups.tracked().count();
    let ready = groups.tracked().filter(|p| p.is_ready_running()).count();
    PhaseResult {
        pods_ready: Some(ready),
        pods_total: Some(total),
        ..PhaseResult::new(DeploymentPhase::Running)
    }
}

/// Progress message derived from the first pod of a role
fn progress_message(pods: &[&PodObservation], role: PodRole) -> String {
    let Some(pod) = pods.first() else {
        return format!("Waiting for {} pod...", role.display_name());
    };

    match pod.phase {
        PodPhase::Pending => {
            for container in &pod.containers {
                match container.state_detail.as_deref() {
                    Some("ContainerCreating") => return "Creating container...".to_string(),
                    Some("PodInitializing") => return "Initializing...".to_string(),
                    _ => {}
                }
            }
            "Pod pending...".to_string()
        }
        PodPhase::Running => {
            let ready = pod.ready_containers();
            let total = pod.containers.len();
            if ready < total {
                format!("Containers: {}/{} ready", ready, total)
            } else {
                "Starting...".to_string()
            }
        }
        other => format!("Status: {}", other),
    }
}

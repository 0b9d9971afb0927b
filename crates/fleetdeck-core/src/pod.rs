//! Pod observations
//!
//! A `PodObservation` is a plain snapshot of a pod and its containers, built
//! fresh from the cluster on every query. The phase engine only ever sees
//! these records, never the raw API objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Container waiting/terminated reasons that mean the pod will not recover on its own
pub const FATAL_CONTAINER_REASONS: &[&str] =
    &["CrashLoopBackOff", "ErrImagePull", "ImagePullBackOff", "Error"];

/// Restart count above which a pod is considered failed
pub const MAX_RESTARTS: u32 = 5;

/// Pod phase as reported by the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[default]
    Unknown,
}

impl PodPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        }
    }
}

impl From<&str> for PodPhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Running,
    Waiting,
    Terminated,
    #[default]
    Unknown,
}

/// One container of an observed pod
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContainerObservation {
    pub name: String,
    pub ready: bool,
    pub state: ContainerState,
    /// Waiting or terminated reason, e.g. `CrashLoopBackOff`
    pub state_detail: Option<String>,
    pub restart_count: u32,
}

impl ContainerObservation {
    /// A ready, running container
    pub fn ready(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: true,
            state: ContainerState::Running,
            state_detail: None,
            restart_count: 0,
        }
    }

    /// A waiting container with the given reason
    pub fn waiting(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: false,
            state: ContainerState::Waiting,
            state_detail: Some(reason.into()),
            restart_count: 0,
        }
    }

    fn is_fatal(&self) -> bool {
        let fatal_reason = self
            .state_detail
            .as_deref()
            .map(|d| FATAL_CONTAINER_REASONS.contains(&d))
            .unwrap_or(false);
        fatal_reason || self.restart_count > MAX_RESTARTS
    }
}

/// Snapshot of a single pod
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodObservation {
    pub name: String,
    pub phase: PodPhase,
    pub containers: Vec<ContainerObservation>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(rename = "created")]
    pub created_at: Option<DateTime<Utc>>,
}

impl PodObservation {
    pub fn new(name: impl Into<String>, phase: PodPhase) -> Self {
        Self {
            name: name.into(),
            phase,
            ..Default::default()
        }
    }

    /// Builder-style container append
    pub fn with_container(mut self, container: ContainerObservation) -> Self {
        self.containers.push(container);
        self
    }

    /// Role derived from the pod name, if it is one the phase engine tracks
    pub fn role(&self) -> Option<PodRole> {
        PodRole::from_pod_name(&self.name)
    }

    /// Running, with at least one container, and every container ready
    pub fn is_ready_running(&self) -> bool {
        self.phase == PodPhase::Running
            && !self.containers.is_empty()
            && self.containers.iter().all(|c| c.ready)
    }

    /// Failed phase, a fatal container reason, or too many restarts
    pub fn is_failed(&self) -> bool {
        self.phase == PodPhase::Failed || self.containers.iter().any(|c| c.is_fatal())
    }

    /// `"{container}: {detail}"` for the first container with a detail, else the pod phase
    pub fn failure_reason(&self) -> String {
        self.containers
            .iter()
            .find_map(|c| {
                c.state_detail
                    .as_ref()
                    .map(|detail| format!("{}: {}", c.name, detail))
            })
            .unwrap_or_else(|| self.phase.to_string())
    }

    pub fn ready_containers(&self) -> usize {
        self.containers.iter().filter(|c| c.ready).count()
    }

    /// Whether the pod belongs to a queue-mode role (worker or webhook)
    pub fn is_queue_component(&self) -> bool {
        self.name.contains("worker") || self.name.contains("webhook")
    }
}

/// Role of a pod in an n8n deployment, by name prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodRole {
    Database,
    Main,
    Worker,
    Webhook,
}

impl PodRole {
    pub fn from_pod_name(name: &str) -> Option<Self> {
        if name.starts_with("postgres-") {
            Some(PodRole::Database)
        } else if name.starts_with("n8n-main") {
            Some(PodRole::Main)
        } else if name.starts_with("n8n-worker") {
            Some(PodRole::Worker)
        } else if name.starts_with("n8n-webhook") {
            Some(PodRole::Webhook)
        } else {
            None
        }
    }

    /// Name used in "Waiting for ... pod" messages
    pub fn display_name(&self) -> &'static str {
        match self {
            PodRole::Database => "postgres",
            PodRole::Main => "n8n-main",
            PodRole::Worker => "n8n-worker",
            PodRole::Webhook => "n8n-webhook",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_name() {
        assert_eq!(PodRole::from_pod_name("postgres-n8n-v1-0"), Some(PodRole::Database));
        assert_eq!(PodRole::from_pod_name("n8n-main-0"), Some(PodRole::Main));
        assert_eq!(PodRole::from_pod_name("n8n-worker-7d9f-abc"), Some(PodRole::Worker));
        assert_eq!(PodRole::from_pod_name("n8n-webhook-55c-xyz"), Some(PodRole::Webhook));
        assert_eq!(PodRole::from_pod_name("redis-0"), None);
        assert_eq!(PodRole::from_pod_name("postgres"), None);
    }

    #[test]
    fn test_ready_running_requires_containers() {
        let empty = PodObservation::new("n8n-main-0", PodPhase::Running);
        assert!(!empty.is_ready_running());

        let ready = empty.clone().with_container(ContainerObservation::ready("n8n"));
        assert!(ready.is_ready_running());

        let partial = ready.with_container(ContainerObservation::waiting("sidecar", "ContainerCreating"));
        assert!(!partial.is_ready_running());
    }

    #[test]
    fn test_failed_detection() {
        let crash = PodObservation::new("n8n-main-0", PodPhase::Running)
            .with_container(ContainerObservation::waiting("n8n", "CrashLoopBackOff"));
        assert!(crash.is_failed());

        let mut restarts = ContainerObservation::ready("n8n");
        restarts.restart_count = 6;
        let flapping = PodObservation::new("n8n-main-0", PodPhase::Running).with_container(restarts);
        assert!(flapping.is_failed());

        let mut five = ContainerObservation::ready("n8n");
        five.restart_count = 5;
        let fine = PodObservation::new("n8n-main-0", PodPhase::Running).with_container(five);
        assert!(!fine.is_failed());

        assert!(PodObservation::new("postgres-x-0", PodPhase::Failed).is_failed());
        assert!(
            !PodObservation::new("postgres-x-0", PodPhase::Pending)
                .with_container(ContainerObservation::waiting("pg", "ContainerCreating"))
                .is_failed()
        );
    }

    #[test]
    fn test_failure_reason() {
        let pod = PodObservation::new("n8n-main-0", PodPhase::Running)
            .with_container(ContainerObservation::ready("init"))
            .with_container(ContainerObservation::waiting("n8n", "ImagePullBackOff"));
        assert_eq!(pod.failure_reason(), "n8n: ImagePullBackOff");

        let bare = PodObservation::new("n8n-main-0", PodPhase::Failed);
        assert_eq!(bare.failure_reason(), "Failed");
    }

    #[test]
    fn test_phase_from_str() {
        assert_eq!(PodPhase::from("Running"), PodPhase::Running);
        assert_eq!(PodPhase::from("Evicted"), PodPhase::Unknown);
    }

    #[test]
    fn test_serialized_shape() {
        let pod = PodObservation::new("n8n-main-0", PodPhase::Pending)
            .with_container(ContainerObservation::waiting("n8n", "PodInitializing"));
        let json = serde_json::to_value(&pod).unwrap();
        assert_eq!(json["phase"], "Pending");
        assert_eq!(json["containers"][0]["state"], "waiting");
        assert_eq!(json["containers"][0]["state_detail"], "PodInitializing");
        assert!(json["created"].is_null());
        assert!(json.get("labels").is_none());
    }
}

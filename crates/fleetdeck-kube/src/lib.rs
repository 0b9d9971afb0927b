//! fleetdeck Kube - Kubernetes integration for fleetdeck
//!
//! This crate provides:
//! - **Cluster access**: `ClusterApi` over kube-rs, plus an in-memory mock
//! - **External tools**: helm, kubectl and the bundled scripts behind `ExternalTool`
//! - **Lifecycle**: deploy, delete and inspect deployment namespaces
//! - **Phase stream**: live phase updates driven by a pod watch
//! - **Resources**: memory capacity estimation
//! - **Snapshots**: database snapshot registry
//! - **Infrastructure**: redis, backup storage and API server health

pub mod cluster;
pub mod error;
pub mod events;
pub mod infrastructure;
pub mod lifecycle;
pub mod mock;
pub mod release;
pub mod resources;
pub mod snapshots;
pub mod tool;

pub use cluster::{
    ClusterApi, EventRecord, KubeCluster, NamespaceInfo, PodEvent, PodEventKind, PodEventStream, PodFootprint,
};
pub use error::{KubeError, Result};
pub use events::{PhaseStream, StreamEvent};
pub use infrastructure::{
    ComponentHealth, HealthReport, InfrastructureStatus, cluster_health, infrastructure_status,
};
pub use lifecycle::{
    DeployOutcome, DeploymentManager, DeploymentStatus, DeploymentSummary, LifecycleSettings, LogBlock, PodCounts,
};
pub use mock::{MockCluster, OperationCounts, RecordingTool, WatchScript};
pub use release::{InstallArgs, ReleaseRunner};
pub use resources::{
    CanDeploy, DeploymentUsage, MemorySummary, QUEUE_MODE_MEMORY_MI, REGULAR_MODE_MEMORY_MI, ResourceReport,
    cluster_resources, estimate,
};
pub use snapshots::{MAX_UPLOAD_BYTES, SHARED_SOURCE, ScriptOutcome, SnapshotRegistry, StagedUpload};
pub use tool::{ExternalTool, Invocation, ProcessTool, ToolConfig, ToolOutput};

//! fleetdeck Core - domain types for managing isolated n8n deployments
//!
//! This crate is free of I/O and provides:
//! - `quantity`: Kubernetes memory quantity parsing
//! - `pod`: plain pod/container observations decoupled from the cluster API
//! - `phase`: the deployment phase engine
//! - `validate`: input validation for names, versions and snapshot files
//! - `deploy`: deploy requests, namespace naming and access URLs
//! - `values`: typed helm values and their rendering to a values document
//! - `snapshot`: parsing of snapshot listings

pub mod deploy;
pub mod error;
pub mod phase;
pub mod pod;
pub mod quantity;
pub mod snapshot;
pub mod validate;
pub mod values;

pub use deploy::{DeployMode, DeployRequest, access_port, access_url, namespace_for, version_from_namespace};
pub use error::{CoreError, Result};
pub use phase::{DeploymentPhase, PhaseResult, calculate_phase};
pub use pod::{ContainerObservation, ContainerState, PodObservation, PodPhase, PodRole};
pub use quantity::{parse_memory, to_mebibytes};
pub use snapshot::{Snapshot, SnapshotKind, parse_snapshot_listing};
pub use values::HelmValues;

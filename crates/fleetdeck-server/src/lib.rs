//! fleetdeck Server - HTTP API for managing isolated n8n deployments
//!
//! The binary wires a kube-rs cluster, the helm/kubectl tools and the
//! GitHub release feed into `AppState`, then serves `routes::router`.

pub mod cache_control;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::{AppConfig, Cli, LogFormat};
pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;

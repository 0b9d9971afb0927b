use std::sync::Arc;

use fleetdeck_kube::{ClusterApi, DeploymentManager, ExternalTool, ReleaseRunner, SnapshotRegistry};
use fleetdeck_repo::VersionCatalog;

use crate::config::AppConfig;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub cluster: Arc<dyn ClusterApi>,
    pub manager: DeploymentManager,
    pub snapshots: SnapshotRegistry,
    pub catalog: Arc<VersionCatalog>,
    pub system_namespace: String,
}

impl AppState {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        tool: Arc<dyn ExternalTool>,
        catalog: Arc<VersionCatalog>,
        config: &AppConfig,
    ) -> Self {
        let tools = config.tool_config();
        let system_namespace = config.kubernetes.system_namespace.clone();

        let releases = ReleaseRunner::new(tool.clone(), tools.clone());
        let manager = DeploymentManager::new(cluster.clone(), releases, config.lifecycle_settings());
        let snapshots = SnapshotRegistry::new(tool, cluster.clone(), tools, system_namespace.clone());

        Self {
            cluster,
            manager,
            snapshots,
            catalog,
            system_namespace,
        }
    }

    pub fn deployment_selector(&self) -> &str {
        &self.manager.settings().deployment_selector
    }
}

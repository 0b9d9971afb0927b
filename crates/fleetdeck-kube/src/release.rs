//! Helm release operations
//!
//! A deployment is installed by the deploy script (which wraps
//! `helm install`) and removed with `helm uninstall`. Release values are
//! read back to report how a deployment was seeded.

use serde_json::Value as JsonValue;
use std::io::Write;
use std::sync::Arc;

use fleetdeck_core::{DeployMode, HelmValues};

use crate::error::{KubeError, Result};
use crate::tool::{ExternalTool, Invocation, ToolConfig, ToolOutput};

const DEPLOY_SCRIPT: &str = "deploy-version.sh";

/// Arguments for one deploy script run
#[derive(Debug, Clone)]
pub struct InstallArgs<'a> {
    pub version: &'a str,
    pub mode: DeployMode,
    pub name: Option<&'a str>,
    pub snapshot: Option<&'a str>,
    pub values: Option<&'a HelmValues>,
}

/// Runs helm and the deploy script
#[derive(Clone)]
pub struct ReleaseRunner {
    tool: Arc<dyn ExternalTool>,
    config: ToolConfig,
}

impl ReleaseRunner {
    pub fn new(tool: Arc<dyn ExternalTool>, config: ToolConfig) -> Self {
        Self { tool, config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run the deploy script
    ///
    /// Helm values, when any are set, are written to a temporary file that
    /// lives until the script has finished.
    pub async fn install(&self, args: &InstallArgs<'_>) -> Result<ToolOutput> {
        let mut invocation = Invocation::new(self.config.script(DEPLOY_SCRIPT), self.config.deploy_timeout)
            .cwd(&self.config.workdir)
            .arg(args.version)
            .arg(args.mode.flag());

        if let Some(name) = args.name {
            invocation = invocation.args(["--name", name]);
        }
        if let Some(snapshot) = args.snapshot {
            invocation = invocation.args(["--snapshot", snapshot]);
        }

        let rendered = match args.values {
            Some(values) => values.to_yaml()?,
            None => None,
        };
        let values_file = match rendered {
            Some(yaml) => {
                let mut file = tempfile::Builder::new()
                    .prefix("fleetdeck-values-")
                    .suffix(".yaml")
                    .tempfile()?;
                file.write_all(yaml.as_bytes())?;
                file.flush()?;
                tracing::debug!(path = %file.path().display(), "Wrote helm values");
                Some(file)
            }
            None => None,
        };
        if let Some(file) = &values_file {
            invocation = invocation.args(["--values-file".to_string(), file.path().to_string_lossy().into_owned()]);
        }

        let output = self.tool.invoke(&invocation).await;
        drop(values_file);
        output
    }

    /// `helm uninstall` the release named after the namespace
    pub async fn uninstall(&self, namespace: &str) -> Result<ToolOutput> {
        let invocation = Invocation::new(&self.config.helm, self.config.uninstall_timeout).args([
            "uninstall",
            namespace,
            "--namespace",
            namespace,
            "--wait",
        ]);
        self.tool.invoke(&invocation).await
    }

    /// User-supplied values of the release, or `None` if helm has none
    pub async fn release_values(&self, namespace: &str) -> Result<Option<JsonValue>> {
        let invocation = Invocation::new(&self.config.helm, self.config.query_timeout)
            .args(["get", "values", namespace, "-n", namespace, "-o", "json"]);
        let output = self.tool.invoke(&invocation).await?;
        if !output.success() {
            return Ok(None);
        }
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }
        serde_json::from_str(trimmed).map(Some).map_err(KubeError::from)
    }
}

/// Snapshot a deployment was seeded from, according to its release values
pub fn seeded_snapshot(values: &JsonValue) -> Option<String> {
    let snapshot = values.pointer("/database/isolated/snapshot")?;
    if !snapshot.get("enabled").and_then(JsonValue::as_bool).unwrap_or(false) {
        return None;
    }
    let name = snapshot.get("name").and_then(JsonValue::as_str)?;
    let name = name.strip_suffix(".sql").unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}

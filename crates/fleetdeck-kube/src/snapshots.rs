//! Database snapshot registry
//!
//! Snapshots live in the backup-storage pod of the system namespace and are
//! managed through the bundled scripts. Script failures are reported in the
//! outcome rather than as errors; bad input is rejected before any script
//! runs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;

use fleetdeck_core::CoreError;
use fleetdeck_core::snapshot::{Snapshot, SnapshotKind, parse_snapshot_listing};
use fleetdeck_core::validate::{
    validate_filename, validate_namespace, validate_snapshot_name, validate_snapshot_ref, validate_upload_name,
};

use crate::cluster::ClusterApi;
use crate::error::Result;
use crate::tool::{ExternalTool, Invocation, ToolConfig, ToolOutput};

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Source meaning the shared database rather than a deployment
pub const SHARED_SOURCE: &str = "shared";

const BACKUP_SELECTOR: &str = "app=backup-storage";
const SNAPSHOT_DIR: &str = "/backups/snapshots";
const CONFIRM: &str = "yes\n";

/// Result of a snapshot operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl ScriptOutcome {
    fn succeeded(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Outcome of a script run: `message` on success, stderr on failure
    fn from_output(output: ToolOutput, message: impl Into<String>, failure: Option<&str>) -> Self {
        if output.success() {
            Self {
                output: Some(output.stdout),
                ..Self::succeeded(message)
            }
        } else {
            Self {
                success: false,
                message: failure.map(str::to_string),
                error: Some(output.stderr),
                output: Some(output.stdout),
                filename: None,
            }
        }
    }
}

/// Snapshot operations over the storage scripts
#[derive(Clone)]
pub struct SnapshotRegistry {
    tool: Arc<dyn ExternalTool>,
    cluster: Arc<dyn ClusterApi>,
    config: ToolConfig,
    system_namespace: String,
}

impl SnapshotRegistry {
    pub fn new(
        tool: Arc<dyn ExternalTool>,
        cluster: Arc<dyn ClusterApi>,
        config: ToolConfig,
        system_namespace: impl Into<String>,
    ) -> Self {
        Self {
            tool,
            cluster,
            config,
            system_namespace: system_namespace.into(),
        }
    }

    fn script(&self, name: &str) -> Invocation {
        Invocation::new(self.config.script(name), self.config.snapshot_timeout).cwd(&self.config.workdir)
    }

    /// All snapshots, or named ones only; empty when storage is not ready
    pub async fn list(&self, named_only: bool) -> Vec<Snapshot> {
        let mut invocation =
            Invocation::new(self.config.script("list-snapshots.sh"), self.config.list_timeout).cwd(&self.config.workdir);
        if named_only {
            invocation = invocation.arg("--named-only");
        }

        match self.tool.invoke(&invocation).await {
            Ok(output) if output.success() => {
                let only = named_only.then_some(SnapshotKind::Named);
                parse_snapshot_listing(&output.stdout, only)
            }
            Ok(output) => {
                tracing::debug!("Snapshot listing failed: {}", output.stderr.trim());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Snapshot listing unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Timestamped snapshot of the shared database
    pub async fn create(&self) -> Result<ScriptOutcome> {
        let output = self.tool.invoke(&self.script("create-snapshot.sh")).await?;
        Ok(ScriptOutcome::from_output(output, "Snapshot creation started", None))
    }

    /// Named snapshot of the shared database or of a deployment's database
    pub async fn create_named(&self, name: &str, source: &str) -> Result<ScriptOutcome> {
        validate_snapshot_name(name)?;
        let mut invocation = self.script("create-named-snapshot.sh").arg(name);
        if source != SHARED_SOURCE {
            validate_namespace(source)?;
            invocation = invocation.args(["--source", source]);
        }

        let output = self.tool.invoke(&invocation).await?;
        Ok(ScriptOutcome::from_output(
            output,
            format!("Named snapshot '{}' created", name),
            None,
        ))
    }

    pub async fn delete(&self, filename: &str) -> Result<ScriptOutcome> {
        validate_filename(filename)?;
        let invocation = self.script("delete-snapshot.sh").arg(filename).stdin(CONFIRM);
        let output = self.tool.invoke(&invocation).await?;
        Ok(ScriptOutcome::from_output(output, format!("Snapshot {} deleted", filename), None))
    }

    /// Restore the shared database
    pub async fn restore(&self, snapshot: &str) -> Result<ScriptOutcome> {
        validate_restore_target(snapshot)?;
        let invocation = self.script("restore-snapshot.sh").arg(snapshot).stdin(CONFIRM);
        let output = self.tool.invoke(&invocation).await?;
        Ok(ScriptOutcome::from_output(
            output,
            format!("Snapshot {} restored", snapshot),
            Some("Restore failed"),
        ))
    }

    /// Restore a deployment's isolated database
    pub async fn restore_to_deployment(&self, snapshot: &str, namespace: &str) -> Result<ScriptOutcome> {
        validate_restore_target(snapshot)?;
        validate_namespace(namespace)?;
        let invocation = self
            .script("restore-to-deployment.sh")
            .args([snapshot, namespace])
            .stdin(CONFIRM);
        let output = self.tool.invoke(&invocation).await?;
        Ok(ScriptOutcome::from_output(
            output,
            format!("Snapshot {} restored to {}", snapshot, namespace),
            Some("Restore failed"),
        ))
    }

    /// Store an uploaded SQL dump as `<name>.sql` in backup storage
    pub async fn upload(
        &self,
        name: &str,
        original_filename: &str,
        mut content: StagedUpload,
    ) -> Result<ScriptOutcome> {
        validate_upload_name(name)?;
        if !original_filename.ends_with(".sql") {
            return Err(CoreError::validation("file", "must be a .sql file").into());
        }
        if content.is_empty() {
            return Err(CoreError::validation("file", "is empty").into());
        }
        content.finish().await?;
        let bytes = content.len();

        let pods = self
            .cluster
            .list_pods_by_label(&self.system_namespace, BACKUP_SELECTOR)
            .await?;
        let Some(pod) = pods.first() else {
            return Ok(ScriptOutcome::failed(format!(
                "Could not find backup-storage pod in {}",
                self.system_namespace
            )));
        };

        let filename = format!("{}.sql", name);
        let destination = format!("{}/{}:{}/{}", self.system_namespace, pod.name, SNAPSHOT_DIR, filename);
        let invocation = Invocation::new(&self.config.kubectl, self.config.snapshot_timeout).args([
            "cp".to_string(),
            content.path().to_string_lossy().into_owned(),
            destination,
        ]);
        let output = self.tool.invoke(&invocation).await?;
        drop(content);

        if !output.success() {
            tracing::warn!(pod = %pod.name, "Snapshot upload failed: {}", output.stderr.trim());
            return Ok(ScriptOutcome::failed(format!(
                "Failed to copy file to storage: {}",
                output.stderr.trim()
            )));
        }

        tracing::info!(snapshot = %filename, bytes, "Snapshot uploaded");
        Ok(ScriptOutcome {
            filename: Some(filename),
            ..ScriptOutcome::succeeded(format!("Snapshot '{}' uploaded successfully", name))
        })
    }
}

/// Upload written to a temporary file as it arrives
///
/// The file is removed when the value is dropped.
pub struct StagedUpload {
    file: NamedTempFile,
    writer: tokio::fs::File,
    len: usize,
    limit: usize,
}

impl StagedUpload {
    pub fn new() -> Result<Self> {
        Self::with_limit(MAX_UPLOAD_BYTES)
    }

    pub fn with_limit(limit: usize) -> Result<Self> {
        let file = tempfile::Builder::new().prefix("fleetdeck-upload-").suffix(".sql").tempfile()?;
        let writer = tokio::fs::File::from_std(file.as_file().try_clone()?);
        Ok(Self {
            file,
            writer,
            len: 0,
            limit,
        })
    }

    /// Append a chunk, rejecting it once the total passes the limit
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        self.len += chunk.len();
        if self.len > self.limit {
            return Err(CoreError::validation(
                "file",
                format!("too large, maximum size is {}MB", self.limit / (1024 * 1024)),
            )
            .into());
        }
        self.writer.write_all(chunk).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    async fn finish(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// A snapshot to restore, by file name or bare name
fn validate_restore_target(snapshot: &str) -> fleetdeck_core::Result<&str> {
    if snapshot.ends_with(".sql") {
        validate_filename(snapshot)
    } else {
        validate_snapshot_ref(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCluster, RecordingTool};
    use fleetdeck_core::pod::{PodObservation, PodPhase};

    fn registry(tool: &RecordingTool, cluster: &MockCluster) -> SnapshotRegistry {
        SnapshotRegistry::new(
            Arc::new(tool.clone()),
            Arc::new(cluster.clone()),
            ToolConfig::default(),
            "n8n-system",
        )
    }

    async fn staged(chunks: &[&[u8]]) -> StagedUpload {
        let mut upload = StagedUpload::new().unwrap();
        for chunk in chunks {
            upload.write_chunk(chunk).await.unwrap();
        }
        upload
    }

    fn backup_pod() -> PodObservation {
        let mut pod = PodObservation::new("backup-storage-0", PodPhase::Running);
        pod.labels.insert("app".to_string(), "backup-storage".to_string());
        pod
    }

    #[tokio::test]
    async fn test_list_parses_output() {
        let tool = RecordingTool::succeeding("n8n-20240115-093000.sql\ngolden.sql\n");
        let snapshots = registry(&tool, &MockCluster::new()).list(false).await;
        assert_eq!(snapshots.len(), 2);
        assert!(tool.invocations()[0].args.is_empty());
    }

    #[tokio::test]
    async fn test_list_named_only() {
        let tool = RecordingTool::succeeding("n8n-20240115-093000.sql\ngolden.sql\n");
        let snapshots = registry(&tool, &MockCluster::new()).list(true).await;
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name.as_deref(), Some("golden"));
        assert_eq!(tool.invocations()[0].args, vec!["--named-only"]);
    }

    #[tokio::test]
    async fn test_list_failure_is_empty() {
        let tool = RecordingTool::failing(1, "backup-storage not ready");
        assert!(registry(&tool, &MockCluster::new()).list(false).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_named_with_source() {
        let tool = RecordingTool::succeeding("done");
        let reg = registry(&tool, &MockCluster::new());

        let outcome = reg.create_named("before-upgrade", "n8n-v1-85-0").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("Named snapshot 'before-upgrade' created"));

        reg.create_named("nightly", SHARED_SOURCE).await.unwrap();
        let calls = tool.invocations();
        assert_eq!(calls[0].args, vec!["before-upgrade", "--source", "n8n-v1-85-0"]);
        assert_eq!(calls[1].args, vec!["nightly"]);
    }

    #[tokio::test]
    async fn test_create_named_rejects_bad_name() {
        let tool = RecordingTool::succeeding("");
        let err = registry(&tool, &MockCluster::new())
            .create_named("bad name", SHARED_SOURCE)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(tool.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_delete_confirms_and_validates() {
        let tool = RecordingTool::succeeding("deleted");
        let reg = registry(&tool, &MockCluster::new());

        let outcome = reg.delete("golden.sql").await.unwrap();
        assert!(outcome.success);
        assert_eq!(tool.invocations()[0].stdin.as_deref(), Some("yes\n"));

        for bad in ["../etc/passwd.sql", "golden.txt", "a/b.sql", ".sql"] {
            assert!(reg.delete(bad).await.unwrap_err().is_validation(), "{}", bad);
        }
        assert_eq!(tool.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_restore_failure_is_reported() {
        let tool = RecordingTool::failing(1, "psql: connection refused");
        let outcome = registry(&tool, &MockCluster::new())
            .restore("n8n-20240115-093000.sql")
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some("Restore failed"));
        assert_eq!(outcome.error.as_deref(), Some("psql: connection refused"));
    }

    #[tokio::test]
    async fn test_restore_to_deployment_arguments() {
        let tool = RecordingTool::succeeding("restored");
        let outcome = registry(&tool, &MockCluster::new())
            .restore_to_deployment("golden", "customer-a")
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(tool.invocations()[0].args, vec!["golden", "customer-a"]);
        assert!(tool.invocations()[0].program.ends_with("restore-to-deployment.sh"));
    }

    #[tokio::test]
    async fn test_upload_copies_into_backup_pod() {
        let cluster = MockCluster::new();
        cluster.set_pods("n8n-system", vec![backup_pod()]);
        let tool = RecordingTool::with_responder(|inv| {
            let staged = std::fs::read_to_string(&inv.args[1]).unwrap();
            assert_eq!(staged, "SELECT 1;");
            Ok(ToolOutput::ok(""))
        });

        let outcome = registry(&tool, &cluster)
            .upload("golden", "dump.sql", staged(&[b"SELECT ".as_slice(), b"1;"]).await)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.filename.as_deref(), Some("golden.sql"));

        let call = &tool.invocations()[0];
        assert_eq!(call.program, "kubectl");
        assert_eq!(call.args[0], "cp");
        assert_eq!(call.args[2], "n8n-system/backup-storage-0:/backups/snapshots/golden.sql");
        assert!(!std::path::Path::new(&call.args[1]).exists());
    }

    #[tokio::test]
    async fn test_upload_without_backup_pod() {
        let tool = RecordingTool::succeeding("");
        let outcome = registry(&tool, &MockCluster::new())
            .upload("golden", "dump.sql", staged(&[b"SELECT 1;".as_slice()]).await)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Could not find backup-storage pod in n8n-system")
        );
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let tool = RecordingTool::succeeding("");
        let reg = registry(&tool, &MockCluster::new());
        let cases = [("bad name", "a.sql", "x"), ("ok", "a.txt", "x"), ("ok", "a.sql", "")];
        for (name, filename, content) in cases {
            let err = reg
                .upload(name, filename, staged(&[content.as_bytes()]).await)
                .await
                .unwrap_err();
            assert!(err.is_validation(), "{} {}", name, filename);
        }
        assert!(tool.invocations().is_empty());
    }

    #[tokio::test]
    async fn test_staged_upload_enforces_limit_per_chunk() {
        let mut upload = StagedUpload::with_limit(8).unwrap();
        upload.write_chunk(b"SELECT").await.unwrap();
        upload.write_chunk(b"1;").await.unwrap();
        assert_eq!(upload.len(), 8);

        let err = upload.write_chunk(b" ").await.unwrap_err();
        assert!(err.is_validation());
        upload.finish().await.unwrap();
        assert_eq!(std::fs::metadata(upload.path()).unwrap().len(), 8);
    }

    #[test]
    fn test_outcome_json_skips_empty_fields() {
        let json = serde_json::to_value(ScriptOutcome::failed("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }
}

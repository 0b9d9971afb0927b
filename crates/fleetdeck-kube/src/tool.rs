//! External tool invocation
//!
//! Deployments, uninstalls and snapshot operations are delegated to helm,
//! kubectl and the bundled shell scripts. Every call goes through
//! `ExternalTool` so it can be replaced in tests, and every call has a
//! time budget.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{KubeError, Result};

/// A single tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: Duration,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout,
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Text written to the tool's standard input
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Last path component of the program, used in messages
    pub fn tool_name(&self) -> &str {
        Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

/// Captured result of a finished tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Most useful failure text: stderr, else stdout, else `fallback`
    pub fn error_text(&self, fallback: &str) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        fallback.to_string()
    }

    /// stdout and stderr together
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// Runs external programs
///
/// A non-zero exit is reported through `ToolOutput::status`, not as an error;
/// errors mean the tool could not be run or did not finish in time.
#[async_trait]
pub trait ExternalTool: Send + Sync {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// `ExternalTool` that spawns real processes
#[derive(Debug, Clone, Default)]
pub struct ProcessTool;

#[async_trait]
impl ExternalTool for ProcessTool {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let tool = invocation.tool_name().to_string();
        tracing::debug!(tool = %tool, args = ?invocation.args, "Running external tool");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &invocation.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| KubeError::ToolUnavailable {
            tool: tool.clone(),
            message: e.to_string(),
        })?;

        if let (Some(input), Some(mut stdin)) = (&invocation.stdin, child.stdin.take()) {
            stdin.write_all(input.as_bytes()).await?;
            drop(stdin);
        }

        let output = tokio::time::timeout(invocation.timeout, child.wait_with_output())
            .await
            .map_err(|_| KubeError::ToolTimeout {
                tool: tool.clone(),
                seconds: invocation.timeout.as_secs(),
            })??;

        let result = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !result.success() {
            tracing::debug!(tool = %tool, status = ?result.status, "External tool exited unsuccessfully");
        }
        Ok(result)
    }
}

/// Where the tools live and how long each kind of call may take
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfig {
    /// Working directory for the deploy script
    pub workdir: PathBuf,
    /// Directory holding the deploy and snapshot scripts
    pub scripts_dir: PathBuf,
    pub helm: String,
    pub kubectl: String,
    pub deploy_timeout: Duration,
    pub uninstall_timeout: Duration,
    pub list_timeout: Duration,
    /// Snapshot create, restore and copy operations
    pub snapshot_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("/workspace"),
            scripts_dir: PathBuf::from("/workspace/scripts"),
            helm: "helm".to_string(),
            kubectl: "kubectl".to_string(),
            deploy_timeout: Duration::from_secs(120),
            uninstall_timeout: Duration::from_secs(60),
            list_timeout: Duration::from_secs(30),
            snapshot_timeout: Duration::from_secs(300),
            query_timeout: Duration::from_secs(5),
        }
    }
}

impl ToolConfig {
    /// Absolute path of a bundled script
    pub fn script(&self, name: &str) -> String {
        self.scripts_dir.join(name).to_string_lossy().into_owned()
    }
}

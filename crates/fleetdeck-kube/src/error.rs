//! Error types for fleetdeck-kube

use thiserror::Error;

/// Result type for fleetdeck-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while talking to the cluster or running tools
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Invalid input or values rendering failure
    #[error(transparent)]
    Core(#[from] fleetdeck_core::CoreError),

    /// Namespace does not exist
    #[error("Namespace {namespace} not found")]
    NamespaceNotFound { namespace: String },

    /// Waited too long for the cluster
    #[error("{0}")]
    Timeout(String),

    /// External tool could not be started
    #[error("failed to run {tool}: {message}")]
    ToolUnavailable { tool: String, message: String },

    /// External tool exceeded its time budget
    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    /// External tool exited unsuccessfully
    #[error("{message}")]
    ToolFailed {
        tool: String,
        message: String,
        output: String,
    },

    /// Pod watch reported an error
    #[error("watch error: {0}")]
    Watch(String),

    /// Resource version a watch resumed from is no longer available (410)
    #[error("watch resource version expired")]
    WatchExpired,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error or a missing namespace
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
            || matches!(self, KubeError::NamespaceNotFound { .. })
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Check if this error means something took too long
    pub fn is_timeout(&self) -> bool {
        matches!(self, KubeError::Timeout(_) | KubeError::ToolTimeout { .. })
    }

    /// Check if this error was raised by input validation
    pub fn is_validation(&self) -> bool {
        matches!(self, KubeError::Core(e) if e.is_validation())
    }
}

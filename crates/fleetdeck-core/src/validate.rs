//! Input validation
//!
//! Everything that ends up as a script argument, a namespace or a file name is
//! checked here before any external call is made.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{CoreError, Result};

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static pattern is valid")
}

/// DNS label: lowercase alphanumeric and hyphens, at most 63 characters
static NAMESPACE: Lazy<Regex> = Lazy::new(|| pattern(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$"));

/// `major.minor.patch` with an optional pre-release suffix
static VERSION: Lazy<Regex> = Lazy::new(|| pattern(r"^\d+\.\d+\.\d+(-[a-zA-Z0-9.-]+)?$"));

/// Pod and container names
static IDENTIFIER: Lazy<Regex> = Lazy::new(|| pattern(r"^[a-zA-Z0-9][a-zA-Z0-9._-]{0,252}$"));

static SNAPSHOT_NAME: Lazy<Regex> = Lazy::new(|| pattern(r"^[a-zA-Z0-9][a-zA-Z0-9_-]{0,62}$"));

static SNAPSHOT_REF: Lazy<Regex> = Lazy::new(|| pattern(r"^[a-zA-Z0-9][a-zA-Z0-9_-]*$"));

static UPLOAD_NAME: Lazy<Regex> = Lazy::new(|| pattern(r"^[a-zA-Z0-9_-]+$"));

pub fn validate_namespace(namespace: &str) -> Result<&str> {
    if NAMESPACE.is_match(namespace) {
        Ok(namespace)
    } else {
        Err(CoreError::validation(
            "namespace",
            "must be lowercase alphanumeric with hyphens, max 63 chars",
        ))
    }
}

pub fn validate_version(version: &str) -> Result<&str> {
    if VERSION.is_match(version) {
        Ok(version)
    } else {
        Err(CoreError::validation(
            "version",
            "expected major.minor.patch (e.g. 1.85.0 or 1.86.0-beta.1)",
        ))
    }
}

/// Validate a pod or container name; `field` names the value in the error
pub fn validate_identifier<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    if IDENTIFIER.is_match(value) {
        Ok(value)
    } else {
        Err(CoreError::validation(field, "must start with alphanumeric, max 253 chars"))
    }
}

/// Name given to a new named snapshot
pub fn validate_snapshot_name(name: &str) -> Result<&str> {
    if SNAPSHOT_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(CoreError::validation(
            "snapshot name",
            "use letters, numbers, hyphens, underscores (max 63 chars)",
        ))
    }
}

/// Snapshot referenced by a deploy request
pub fn validate_snapshot_ref(name: &str) -> Result<&str> {
    if SNAPSHOT_REF.is_match(name) {
        Ok(name)
    } else {
        Err(CoreError::validation(
            "snapshot",
            "must be alphanumeric with hyphens/underscores",
        ))
    }
}

/// Name under which an uploaded dump is stored
pub fn validate_upload_name(name: &str) -> Result<&str> {
    if UPLOAD_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(CoreError::validation(
            "name",
            "only letters, numbers, hyphens, underscores allowed",
        ))
    }
}

/// Snapshot file name: `<base>.sql`, no path components
pub fn validate_filename(filename: &str) -> Result<&str> {
    let Some(base) = filename.strip_suffix(".sql") else {
        return Err(CoreError::validation("filename", "must end with .sql"));
    };
    if filename.contains('/') || filename.contains("..") || filename.contains('\0') {
        return Err(CoreError::validation("filename", "path traversal not allowed"));
    }
    if !SNAPSHOT_REF.is_match(base) {
        return Err(CoreError::validation("filename", "invalid format"));
    }
    Ok(filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace() {
        assert!(validate_namespace("n8n-v1-85-0").is_ok());
        assert!(validate_namespace("a").is_ok());
        assert!(validate_namespace(&"a".repeat(63)).is_ok());
        assert!(validate_namespace(&"a".repeat(64)).is_err());
        assert!(validate_namespace("-leading").is_err());
        assert!(validate_namespace("trailing-").is_err());
        assert!(validate_namespace("Upper").is_err());
        assert!(validate_namespace("").is_err());
    }

    #[test]
    fn test_version() {
        assert!(validate_version("1.85.0").is_ok());
        assert!(validate_version("1.86.0-beta.1").is_ok());
        assert!(validate_version("1.86.0-rc.1").is_ok());
        assert!(validate_version("1.86").is_err());
        assert!(validate_version("v1.86.0").is_err());
        assert!(validate_version("1.86.0; rm -rf /").is_err());
    }

    #[test]
    fn test_identifier() {
        assert!(validate_identifier("n8n-main-0", "pod").is_ok());
        assert!(validate_identifier("container.name_1", "container").is_ok());
        let err = validate_identifier("../x", "pod").unwrap_err();
        assert!(err.to_string().contains("pod"));
    }

    #[test]
    fn test_snapshot_names() {
        assert!(validate_snapshot_name("before_upgrade-1").is_ok());
        assert!(validate_snapshot_name(&"a".repeat(64)).is_err());
        assert!(validate_snapshot_ref(&"a".repeat(100)).is_ok());
        assert!(validate_snapshot_ref("_hidden").is_err());
        assert!(validate_upload_name("_ok-too").is_ok());
        assert!(validate_upload_name("with space").is_err());
    }

    #[test]
    fn test_filename() {
        assert!(validate_filename("backup-1.sql").is_ok());
        assert!(validate_filename("n8n-20240101-120000.sql").is_ok());
        assert!(validate_filename("../etc.sql").is_err());
        assert!(validate_filename("foo.txt").is_err());
        assert!(validate_filename("dir/file.sql").is_err());
        assert!(validate_filename(".sql").is_err());
        assert!(validate_filename("a\0.sql").is_err());
        assert!(validate_filename("a.b.sql").is_err());
    }

    #[test]
    fn test_errors_are_validation() {
        assert!(validate_filename("foo.txt").unwrap_err().is_validation());
    }
}

//! Deploy requests and the naming conventions derived from them

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::validate;
use crate::values::HelmValues;

/// Base of the NodePort range used for access URLs
const PORT_BASE: u32 = 30000;

static NAMESPACE_VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"n8n-v(\d+)-(\d+)-(\d+)").expect("static pattern is valid"));

/// Deployment topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Main, worker and webhook roles backed by redis
    Queue,
    /// Main role only
    #[default]
    Regular,
}

impl DeployMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMode::Queue => "queue",
            DeployMode::Regular => "regular",
        }
    }

    /// Flag passed to the deploy script
    pub fn flag(&self) -> &'static str {
        match self {
            DeployMode::Queue => "--queue",
            DeployMode::Regular => "--regular",
        }
    }
}

impl FromStr for DeployMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queue" => Ok(DeployMode::Queue),
            "regular" => Ok(DeployMode::Regular),
            _ => Err(CoreError::validation("mode", "must be \"queue\" or \"regular\"")),
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a deploy call
///
/// `mode` stays a plain string so that a bad value is reported as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    pub version: String,
    pub mode: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub helm_values: Option<HelmValues>,
}

impl DeployRequest {
    /// Check every field, returning the parsed mode
    pub fn validate(&self) -> Result<DeployMode> {
        validate::validate_version(&self.version)?;
        let mode = self.mode.parse::<DeployMode>()?;
        if let Some(name) = &self.name {
            validate::validate_namespace(name)?;
        }
        if let Some(snapshot) = &self.snapshot {
            validate::validate_snapshot_ref(snapshot)?;
        }
        Ok(mode)
    }

    /// Namespace the deployment will live in
    pub fn namespace(&self) -> String {
        namespace_for(&self.version, self.name.as_deref())
    }
}

/// Custom name if given, else `n8n-v{version with dots replaced by hyphens}`
pub fn namespace_for(version: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => name.to_string(),
        None => format!("n8n-v{}", version.replace('.', "-")),
    }
}

/// NodePort for a version: `30000 + major*100 + minor*10 + patch`
///
/// A pre-release suffix on the patch component is ignored. Versions whose
/// port would not fit in a `u32` have none.
pub fn access_port(version: &str) -> Option<u32> {
    let mut parts = version.splitn(3, '.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next()?.parse().ok()?;
    let patch_raw = parts.next()?;
    let digits: String = patch_raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    let patch: u32 = digits.parse().ok()?;
    PORT_BASE
        .checked_add(major.checked_mul(100)?)?
        .checked_add(minor.checked_mul(10)?)?
        .checked_add(patch)
}

/// `http://localhost:{port}` for a version
pub fn access_url(version: &str) -> Option<String> {
    access_port(version).map(|port| format!("http://localhost:{}", port))
}

/// Recover `X.Y.Z` from a namespace named `n8n-vX-Y-Z`
pub fn version_from_namespace(namespace: &str) -> Option<String> {
    NAMESPACE_VERSION
        .captures(namespace)
        .map(|caps| format!("{}.{}.{}", &caps[1], &caps[2], &caps[3]))
}

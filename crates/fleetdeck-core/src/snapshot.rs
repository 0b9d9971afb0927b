//! Snapshot listings
//!
//! The storage scripts print one file name per line. Files produced by the
//! backup routine are named `n8n-YYYYMMDD-HHMMSS.sql`; every other `.sql`
//! file is a snapshot someone named explicitly.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const AUTO_PREFIX: &str = "n8n-";

static AUTO_TIMESTAMP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"n8n-(\d{8})-(\d{6})").expect("static pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    Auto,
    Named,
}

/// One snapshot file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
    /// Set for named snapshots: the file name without `.sql`
    pub name: Option<String>,
    /// Set for auto snapshots: `YYYY-MM-DD HH:MM:SS`, or `Unknown`
    pub timestamp: Option<String>,
}

impl Snapshot {
    fn from_filename(filename: &str) -> Self {
        if filename.starts_with(AUTO_PREFIX) {
            Self {
                filename: filename.to_string(),
                kind: SnapshotKind::Auto,
                name: None,
                timestamp: Some(auto_timestamp(filename)),
            }
        } else {
            Self {
                filename: filename.to_string(),
                kind: SnapshotKind::Named,
                name: Some(filename.trim_end_matches(".sql").to_string()),
                timestamp: None,
            }
        }
    }
}

fn auto_timestamp(filename: &str) -> String {
    let Some(caps) = AUTO_TIMESTAMP.captures(filename) else {
        return "Unknown".to_string();
    };
    let (date, time) = (&caps[1], &caps[2]);
    format!(
        "{}-{}-{} {}:{}:{}",
        &date[..4],
        &date[4..6],
        &date[6..8],
        &time[..2],
        &time[2..4],
        &time[4..6]
    )
}

/// Parse script output into snapshots, optionally keeping only one kind
pub fn parse_snapshot_listing(output: &str, only: Option<SnapshotKind>) -> Vec<Snapshot> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.ends_with(".sql"))
        .map(Snapshot::from_filename)
        .filter(|s| only.map(|kind| s.kind == kind).unwrap_or(true))
        .collect()
}

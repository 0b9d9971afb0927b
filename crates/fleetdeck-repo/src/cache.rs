//! Incremental version cache
//!
//! The cache keeps every known n8n version, newest first, and remembers the
//! newest one it has seen. Refresh behaviour depends on the cache state:
//!
//! - **fresh** (checked within the TTL): served as is, no upstream call
//! - **warm** (has versions and a newest): only page 1 of the feed is read,
//!   and entries above the known newest are prepended
//! - **cold** (empty): every page of the feed is read
//!
//! Upstream failures leave the cache and its `last_check` untouched so the
//! next call retries. The cache is persisted as JSON after each successful
//! refresh; failing to persist only logs a warning.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::feed::ReleaseFeed;

/// Hours a refreshed cache is served without asking upstream
pub const DEFAULT_TTL_HOURS: i64 = 6;

/// Persisted cache contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCache {
    /// Known versions, newest first, without duplicates
    #[serde(default)]
    pub versions: Vec<String>,
    /// Time of the last successful refresh
    #[serde(default, deserialize_with = "deserialize_last_check")]
    pub last_check: Option<DateTime<Utc>>,
    /// Newest known version, equal to `versions[0]` when non-empty
    #[serde(default)]
    pub newest: Option<String>,
}

impl VersionCache {
    /// Load a cache file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let cache: Self = serde_json::from_str(&content)?;
        Ok(cache)
    }

    /// Save the cache, creating parent directories as needed
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether the last refresh happened less than `ttl` before `now`
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.last_check.map(|checked| now - checked < ttl).unwrap_or(false)
    }

    /// Warm caches refresh incrementally, cold ones in full
    pub fn is_warm(&self) -> bool {
        !self.versions.is_empty() && self.newest.is_some()
    }

    /// Prepend the entries of a first page that sit above the known newest
    ///
    /// Returns how many versions were added.
    pub fn apply_first_page(&mut self, page: &[String]) -> usize {
        let newest = self.newest.as_deref();
        let known: HashSet<&str> = self.versions.iter().map(String::as_str).collect();

        let mut seen = HashSet::new();
        let fresh: Vec<String> = page
            .iter()
            .take_while(|v| Some(v.as_str()) != newest)
            .filter(|v| !known.contains(v.as_str()) && seen.insert(v.as_str()))
            .cloned()
            .collect();

        let added = fresh.len();
        if added > 0 {
            self.newest = fresh.first().cloned();
            let mut versions = fresh;
            versions.append(&mut self.versions);
            self.versions = versions;
        }
        added
    }

    /// Replace the contents with a full listing
    pub fn replace_all(&mut self, all: Vec<String>) {
        let mut seen = HashSet::new();
        self.versions = all.into_iter().filter(|v| seen.insert(v.clone())).collect();
        self.newest = self.versions.first().cloned();
    }
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps (taken as UTC)
fn deserialize_last_check<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    let Some(raw) = raw else {
        return Ok(None);
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(serde::de::Error::custom)
}

struct CatalogState {
    cache: VersionCache,
    loaded: bool,
}

/// Owner of the version cache
///
/// Refreshes are serialized by an async mutex, so overlapping requests never
/// fetch upstream twice for the same stale period.
pub struct VersionCatalog {
    feed: Arc<dyn ReleaseFeed>,
    path: Option<PathBuf>,
    ttl: Duration,
    state: Mutex<CatalogState>,
}

impl VersionCatalog {
    /// Create a catalog persisted at `path` (or in memory only when `None`)
    pub fn new(feed: Arc<dyn ReleaseFeed>, path: Option<PathBuf>, ttl: Duration) -> Self {
        Self {
            feed,
            path,
            ttl,
            state: Mutex::new(CatalogState {
                cache: VersionCache::default(),
                loaded: false,
            }),
        }
    }

    /// Start from known contents instead of the cache file
    pub fn with_cache(self, cache: VersionCache) -> Self {
        Self {
            state: Mutex::new(CatalogState {
                cache,
                loaded: true,
            }),
            ..self
        }
    }

    /// Available versions, refreshing from upstream if the cache is stale
    pub async fn available_versions(&self) -> Vec<String> {
        self.refresh_at(Utc::now()).await.versions
    }

    /// Refresh as if the current time were `now` and return the resulting cache
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> VersionCache {
        let mut state = self.state.lock().await;

        if !state.loaded {
            state.cache = self.load();
            state.loaded = true;
        }

        if state.cache.is_fresh(now, self.ttl) {
            return state.cache.clone();
        }

        let mut next = state.cache.clone();
        let outcome = if next.is_warm() {
            self.feed.first_page().await.map(|page| {
                let added = next.apply_first_page(&page.versions);
                tracing::info!(added, "Incremental version refresh");
            })
        } else {
            self.feed.all_versions().await.map(|all| {
                tracing::info!(count = all.len(), "Full version refresh");
                next.replace_all(all);
            })
        };

        match outcome {
            Ok(()) => {
                next.last_check = Some(now);
                state.cache = next;
                self.persist(&state.cache);
            }
            Err(e) => {
                tracing::warn!("Release feed unavailable, serving cached versions: {}", e);
            }
        }

        state.cache.clone()
    }

    /// Current contents without refreshing
    pub async fn snapshot(&self) -> VersionCache {
        self.state.lock().await.cache.clone()
    }

    fn load(&self) -> VersionCache {
        let Some(path) = &self.path else {
            return VersionCache::default();
        };
        if !path.exists() {
            return VersionCache::default();
        }
        match VersionCache::load_from(path) {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!("Version cache unreadable, starting cold: {}", e);
                VersionCache::default()
            }
        }
    }

    fn persist(&self, cache: &VersionCache) {
        if let Some(path) = &self.path {
            if let Err(e) = cache.save_to(path) {
                tracing::warn!("Failed to save version cache to {}: {}", path.display(), e);
            }
        }
    }
}

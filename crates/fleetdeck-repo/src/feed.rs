//! Upstream release feed
//!
//! Releases come from the GitHub releases API, newest first, 100 per page.
//! Continuation pages are found through the `Link` response header.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::{RepoError, Result};

/// Default releases endpoint for n8n
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com/repos/n8n-io/n8n/releases";

/// Entries requested per page
pub const DEFAULT_PER_PAGE: u32 = 100;

/// Upper bound on pages walked during a full fetch
const MAX_PAGES: usize = 500;

static LINK_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<([^>]+)>;\s*rel="([^"]+)""#).expect("static pattern is valid"));

static VERSION_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+").expect("static pattern is valid"));

/// One page of normalized versions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleasePage {
    /// Versions in feed order (newest first)
    pub versions: Vec<String>,
    /// URL of the next page, if any
    pub next: Option<String>,
}

/// Source of release versions
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// First page of the feed
    async fn first_page(&self) -> Result<ReleasePage>;

    /// A continuation page returned in a previous `next` link
    async fn page(&self, url: &str) -> Result<ReleasePage>;

    /// Every version across all pages, in feed order
    async fn all_versions(&self) -> Result<Vec<String>> {
        let mut page = self.first_page().await?;
        let mut versions = std::mem::take(&mut page.versions);
        let mut pages = 1;

        while let Some(next) = page.next.take() {
            if pages >= MAX_PAGES {
                tracing::warn!("Release feed exceeded {} pages, stopping", MAX_PAGES);
                break;
            }
            page = self.page(&next).await?;
            versions.append(&mut page.versions);
            pages += 1;
        }

        Ok(versions)
    }
}

#[derive(Debug, Deserialize)]
struct GithubRelease {
    #[serde(default)]
    tag_name: String,
    #[serde(default)]
    draft: bool,
}

/// GitHub releases API client
pub struct GithubFeed {
    client: reqwest::Client,
    first_page_url: Url,
}

impl GithubFeed {
    /// Create a feed for a releases endpoint
    pub fn new(releases_url: &str, per_page: u32, timeout: Duration) -> Result<Self> {
        let mut first_page_url = Url::parse(releases_url).map_err(|e| RepoError::InvalidUrl {
            url: releases_url.to_string(),
            reason: e.to_string(),
        })?;
        first_page_url
            .query_pairs_mut()
            .append_pair("per_page", &per_page.to_string());

        let client = reqwest::Client::builder()
            .user_agent(concat!("fleetdeck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| RepoError::NetworkError {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            first_page_url,
        })
    }

    /// Feed for the public n8n repository
    pub fn n8n() -> Result<Self> {
        Self::new(DEFAULT_RELEASES_URL, DEFAULT_PER_PAGE, Duration::from_secs(10))
    }

    async fn fetch(&self, url: &str) -> Result<ReleasePage> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RepoError::HttpError {
                status: status.as_u16(),
                message: format!("GET {} returned {}", url, status),
            });
        }

        let next = response
            .headers()
            .get(reqwest::header::LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_link_header(v).remove("next"));

        let releases: Vec<GithubRelease> = response.json().await?;
        let versions = releases
            .iter()
            .filter(|r| !r.draft)
            .filter_map(|r| extract_version(&r.tag_name))
            .collect();

        Ok(ReleasePage { versions, next })
    }
}

#[async_trait]
impl ReleaseFeed for GithubFeed {
    async fn first_page(&self) -> Result<ReleasePage> {
        self.fetch(self.first_page_url.as_str()).await
    }

    async fn page(&self, url: &str) -> Result<ReleasePage> {
        self.fetch(url).await
    }
}

/// Parse an RFC 8288 `Link` header into `rel -> url`
pub fn parse_link_header(header: &str) -> HashMap<String, String> {
    header
        .split(',')
        .filter_map(|part| LINK_PART.captures(part.trim()))
        .map(|caps| (caps[2].to_string(), caps[1].to_string()))
        .collect()
}

/// Normalize a release tag (`n8n@1.2.3`, `v1.2.3`) to a version
///
/// Returns `None` unless the result starts with `major.minor.patch`.
pub fn extract_version(tag: &str) -> Option<String> {
    let tag = tag.trim();
    let tag = tag.strip_prefix("n8n@").unwrap_or(tag);
    let tag = tag.strip_prefix('v').unwrap_or(tag);
    VERSION_PREFIX.is_match(tag).then(|| tag.to_string())
}

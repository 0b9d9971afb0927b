//! fleetdeck Repo - upstream n8n release discovery
//!
//! - **Feed**: paginated GitHub releases API, following `Link` headers
//! - **Cache**: on-disk version list refreshed incrementally after a TTL

pub mod cache;
pub mod error;
pub mod feed;

pub use cache::{VersionCache, VersionCatalog, DEFAULT_TTL_HOURS};
pub use error::{RepoError, Result};
pub use feed::{
    DEFAULT_PER_PAGE, DEFAULT_RELEASES_URL, GithubFeed, ReleaseFeed, ReleasePage, extract_version,
    parse_link_header,
};

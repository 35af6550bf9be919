//! Network collaborators of the sync service.
//!
//! The service only sees the two traits below. The reqwest
//! implementations talk to Plex (watchlist source) and to an
//! Overseerr-compatible request service.

mod overseerr;
mod plex;

pub use overseerr::OverseerrClient;
pub use plex::PlexWatchlistClient;

use async_trait::async_trait;
use portal_core::{MediaType, PortalResult, RequestServiceConfig, WatchlistItem};
use serde::{Deserialize, Serialize};

/// Source of users' external watchlists.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchlistSource: Send + Sync {
    /// Checks the token against the source. `Ok(false)` means the token was
    /// rejected; `Err` means the source could not be reached.
    async fn validate_token(&self, token: &str) -> PortalResult<bool>;

    /// Fetches the full current watchlist.
    async fn get_watchlist(&self, token: &str) -> PortalResult<Vec<WatchlistItem>>;
}

/// A request for one media item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRequest {
    pub media_type: MediaType,
    /// TMDB id of the media.
    pub media_id: i64,
    pub tvdb_id: Option<i64>,
}

impl MediaRequest {
    /// Builds a request for `item`, or `None` when it has no TMDB id.
    #[must_use]
    pub fn for_item(item: &WatchlistItem) -> Option<Self> {
        item.tmdb_id.map(|media_id| Self {
            media_type: item.media_type,
            media_id,
            tvdb_id: item.tvdb_id,
        })
    }
}

/// Successful outcome of a request submission. A failed submission is an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new request was created.
    Created { request_id: Option<String> },
    AlreadyRequested,
    AlreadyAvailable,
}

/// Downstream request-management service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestSubmitter: Send + Sync {
    /// Submits `request` to the configured `service`.
    async fn submit_request(
        &self,
        service: &RequestServiceConfig,
        request: &MediaRequest,
    ) -> PortalResult<SubmitOutcome>;
}

/// Shortens an upstream error body for logs and stored errors.
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    let body = body.trim();
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

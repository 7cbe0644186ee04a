//! The transport boundary: traits the rest of the crate consumes and the
//! error taxonomy every call surfaces.
//!
//! Trait methods return [`BoxFuture`] so implementations stay object-safe
//! and mockable; the only shipped implementation is [`Client`].

use crate::activity::{ActivityFeed, ActivityFeedQuery};
use crate::meta::Metadata;
use crate::resources::{
    ApplicationItem, ApplicationList, ClusterList, ExperimentList, RecommendationList,
    ScenarioList, TrialList,
};
use futures::future::BoxFuture;
use std::time::Duration;
use thiserror::Error;

mod client;

pub use client::Client;

/// Errors surfaced by API calls.
///
/// `RateLimited` is the one recoverable kind: the polling subscriber folds
/// its advisory delay into the next wait interval instead of reporting it.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Server signaled `activity-rate-limited` (HTTP 429 semantics) with an
    /// advisory retry-after duration.
    #[error("activity rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    /// Resource does not exist (HTTP 404).
    #[error("resource not found")]
    NotFound,
    /// Any other non-2xx HTTP response.
    #[error("HTTP error: status {0}")]
    Http(u16),
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
    /// Request exceeded the per-request timeout.
    #[error("request timed out")]
    Timeout,
    /// Response body exceeded the size limit.
    #[error("response too large")]
    ResponseTooLarge,
    /// A URL could not be parsed or joined.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// Traversal aborted by the caller's cancellation token.
    #[error("operation cancelled")]
    Cancelled,
}

/// Activity feed operations consumed by the subscription machinery.
pub trait ActivityApi: Send + Sync {
    /// Fetches one feed snapshot from `feed_url`, restricted by `query`.
    ///
    /// Implementations must surface throttling as
    /// [`ApiError::RateLimited`] and resolve relative URLs in the decoded
    /// feed against the request URL.
    fn list_activity<'a>(
        &'a self,
        feed_url: &'a str,
        query: &'a ActivityFeedQuery,
    ) -> BoxFuture<'a, Result<ActivityFeed, ApiError>>;

    /// Probes the API root, returning its metadata. The activity feed URL
    /// is discovered from an out-of-band relation link in the result.
    fn check_endpoint(&self) -> BoxFuture<'_, Result<Metadata, ApiError>>;
}

/// Fetches a continuation page of kind `P` by following a server-provided
/// link verbatim. No query parameters are re-applied: the continuation URL
/// already encodes them.
pub trait PageSource<P>: Send + Sync {
    fn fetch_page<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<P, ApiError>>;
}

/// Query-based entry points for the server-paginated collections.
///
/// Each collection pairs an initial query-driven list call here with a
/// [`PageSource`] impl for its continuation pages.
pub trait Api:
    PageSource<ApplicationList>
    + PageSource<ScenarioList>
    + PageSource<ClusterList>
    + PageSource<ExperimentList>
    + PageSource<TrialList>
    + PageSource<RecommendationList>
    + Send
    + Sync
{
    fn list_applications<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ApplicationList, ApiError>>;

    /// Exact-name lookup; `NotFound` triggers the lister's title fallback.
    fn get_application<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ApplicationItem, ApiError>>;

    fn list_scenarios<'a>(
        &'a self,
        application: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ScenarioList, ApiError>>;

    fn list_clusters<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ClusterList, ApiError>>;

    fn list_experiments<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ExperimentList, ApiError>>;

    fn list_trials<'a>(
        &'a self,
        experiment: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<TrialList, ApiError>>;

    fn list_recommendations<'a>(
        &'a self,
        application: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<RecommendationList, ApiError>>;
}

/// Common query shape for the initial page of a list call.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Server page size override for the first page only.
    pub limit: Option<u32>,
}

impl ListQuery {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        match self.limit {
            Some(n) => vec![("limit", n.to_string())],
            None => Vec::new(),
        }
    }
}

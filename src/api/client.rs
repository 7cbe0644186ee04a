//! reqwest-based implementation of the API traits.
//!
//! OAuth2 is consumed opaquely: the caller supplies an already-acquired
//! access token and every request carries it as a bearer credential. The
//! client enforces a per-request timeout and a response size cap, maps
//! HTTP 429 to [`ApiError::RateLimited`] with the advertised `Retry-After`
//! duration, and applies the metadata precedence rule: transport headers
//! win over same-named body `_metadata` entries for the top-level entity.

use crate::activity::{ActivityFeed, ActivityFeedQuery};
use crate::api::{ActivityApi, Api, ApiError, ListQuery, PageSource};
use crate::meta::Metadata;
use crate::resources::{
    ApplicationItem, ApplicationList, ClusterList, ExperimentList, ItemPage, RecommendationList,
    ScenarioList, TrialList,
};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Fallback when a 429 carries no usable `Retry-After` header.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// HTTP client bound to one API endpoint.
///
/// Cheap to clone and safe to share: the reqwest client is an Arc
/// internally and nothing here is mutated after construction.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    endpoint: Url,
    token: Option<SecretString>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl Client {
    /// Creates a client for `endpoint`, optionally authorized by an OAuth2
    /// access token. The endpoint path is normalized to end with `/` so
    /// relative references resolve under it rather than replacing its last
    /// segment.
    pub fn new(endpoint: &str, token: Option<SecretString>) -> Result<Self, ApiError> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }
        Ok(Client {
            http: reqwest::Client::new(),
            endpoint,
            token: token.filter(|t| !t.expose_secret().is_empty()),
        })
    }

    /// Resolves a possibly-relative URL against the configured endpoint.
    fn resolve(&self, url: &str) -> Result<Url, ApiError> {
        match Url::parse(url) {
            Ok(u) => Ok(u),
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(self.endpoint.join(url)?),
            Err(e) => Err(e.into()),
        }
    }

    fn url_for(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.endpoint.join(path)?)
    }

    /// Performs a GET and returns the header metadata, the final request
    /// URL (for relative-reference resolution), and the raw body.
    async fn get_raw(
        &self,
        url: Url,
        query: &[(&'static str, String)],
    ) -> Result<(Metadata, String, Vec<u8>), ApiError> {
        let mut request = self
            .http
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = tokio::time::timeout(REQUEST_TIMEOUT, request.send())
            .await
            .map_err(|_| ApiError::Timeout)?
            .map_err(ApiError::Network)?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after(response.headers());
            tracing::debug!(?retry_after, "Server rate limited the request");
            return Err(ApiError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }
        if !status.is_success() {
            return Err(ApiError::Http(status.as_u16()));
        }

        let metadata = Metadata::from_headers(response.headers());
        let final_url = response.url().to_string();
        let body = read_limited_bytes(response, MAX_RESPONSE_SIZE).await?;
        Ok((metadata, final_url, body))
    }

    /// Fetches and decodes one list page, merging header metadata over the
    /// body's top-level `_metadata`. Per-item metadata stays as decoded
    /// from the body since no per-item headers exist.
    async fn get_page<P>(&self, url: Url, query: &[(&'static str, String)]) -> Result<P, ApiError>
    where
        P: ItemPage + DeserializeOwned,
    {
        let (headers, _, body) = self.get_raw(url, query).await?;
        let mut page: P =
            serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
        let body_md = std::mem::take(page.metadata_mut());
        *page.metadata_mut() = headers.merge_fallback(body_md);
        Ok(page)
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Duration {
    // Only the delta-seconds form is supported; the HTTP-date form falls
    // back to the default.
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, ApiError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(ApiError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(ApiError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(ApiError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

impl ActivityApi for Client {
    fn list_activity<'a>(
        &'a self,
        feed_url: &'a str,
        query: &'a ActivityFeedQuery,
    ) -> BoxFuture<'a, Result<ActivityFeed, ApiError>> {
        async move {
            let url = self.resolve(feed_url)?;
            let (_, final_url, body) = self.get_raw(url, &query.query_pairs()).await?;
            let mut feed: ActivityFeed =
                serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
            feed.set_base_url(&final_url);
            Ok(feed)
        }
        .boxed()
    }

    fn check_endpoint(&self) -> BoxFuture<'_, Result<Metadata, ApiError>> {
        async move {
            let (metadata, _, _) = self.get_raw(self.endpoint.clone(), &[]).await?;
            Ok(metadata)
        }
        .boxed()
    }
}

/// Continuation pages are fetched by following the server-provided link
/// verbatim; one blanket impl covers every list kind.
impl<P> PageSource<P> for Client
where
    P: ItemPage + DeserializeOwned + Send + 'static,
{
    fn fetch_page<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<P, ApiError>> {
        async move { self.get_page(self.resolve(url)?, &[]).await }.boxed()
    }
}

impl Api for Client {
    fn list_applications<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ApplicationList, ApiError>> {
        async move {
            self.get_page(self.url_for("v2/applications")?, &query.query_pairs())
                .await
        }
        .boxed()
    }

    fn get_application<'a>(
        &'a self,
        name: &'a str,
    ) -> BoxFuture<'a, Result<ApplicationItem, ApiError>> {
        async move {
            let url = self.url_for(&format!("v2/applications/{name}"))?;
            let (headers, _, body) = self.get_raw(url, &[]).await?;
            let mut app: ApplicationItem =
                serde_json::from_slice(&body).map_err(|e| ApiError::Decode(e.to_string()))?;
            app.metadata = headers.merge_fallback(std::mem::take(&mut app.metadata));
            Ok(app)
        }
        .boxed()
    }

    fn list_scenarios<'a>(
        &'a self,
        application: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ScenarioList, ApiError>> {
        async move {
            let url = self.url_for(&format!("v2/applications/{application}/scenarios"))?;
            self.get_page(url, &query.query_pairs()).await
        }
        .boxed()
    }

    fn list_clusters<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ClusterList, ApiError>> {
        async move {
            self.get_page(self.url_for("v2/clusters")?, &query.query_pairs())
                .await
        }
        .boxed()
    }

    fn list_experiments<'a>(
        &'a self,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<ExperimentList, ApiError>> {
        async move {
            self.get_page(self.url_for("v1/experiments")?, &query.query_pairs())
                .await
        }
        .boxed()
    }

    fn list_trials<'a>(
        &'a self,
        experiment: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<TrialList, ApiError>> {
        async move {
            let url = self.url_for(&format!("v1/experiments/{experiment}/trials"))?;
            self.get_page(url, &query.query_pairs()).await
        }
        .boxed()
    }

    fn list_recommendations<'a>(
        &'a self,
        application: &'a str,
        query: &'a ListQuery,
    ) -> BoxFuture<'a, Result<RecommendationList, ApiError>> {
        async move {
            let url = self.url_for(&format!("v2/applications/{application}/recommendations"))?;
            self.get_page(url, &query.query_pairs()).await
        }
        .boxed()
    }
}

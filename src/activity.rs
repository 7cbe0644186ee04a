//! Activity feed data model and query shaping.
//!
//! The feed follows the JSON Feed envelope the service emits: a feed URL,
//! optional pagination URL, a list of hubs advertising subscription
//! strategies, and the activity items themselves. Servers are allowed to
//! return relative URLs, so [`ActivityFeed::set_base_url`] resolves every
//! URL field against the request URL after decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Hub strategy type for plain polling.
pub const HUB_TYPE_POLL: &str = "poll";

/// One feed snapshot as returned by the activity endpoint.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivityFeed {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home_page_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feed_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub next_url: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hubs: Vec<Hub>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ActivityItem>,
}

/// A feed-advertised endpoint describing a supported subscription strategy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Hub {
    #[serde(default, rename = "type", skip_serializing_if = "String::is_empty")]
    pub hub_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

/// A single activity entry.
///
/// Identifiers are lexicographically orderable strings consistent with
/// creation order; the service controls the format and the subscriber
/// relies on this ordering without validating it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivityItem {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(
        default,
        rename = "_stormforge",
        skip_serializing_if = "Option::is_none"
    )]
    pub stormforge: Option<ActivityExt>,
}

/// Vendor extension payload carrying failure details for failed activities.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ActivityExt {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
}

impl ActivityItem {
    /// Case-insensitive tag membership test.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Returns the failure reason if the extension payload carries a
    /// non-empty one.
    pub fn failure_reason(&self) -> Option<&str> {
        self.stormforge
            .as_ref()
            .map(|ext| ext.failure_reason.as_str())
            .filter(|r| !r.is_empty())
    }
}

impl ActivityFeed {
    /// Resolves every relative URL field against `base` per RFC 3986 §5.2.
    ///
    /// An unparsable base leaves the feed unchanged; individual fields that
    /// fail to resolve are left as-is. Already-absolute fields resolve to
    /// themselves.
    pub fn set_base_url(&mut self, base: &str) {
        let Ok(base) = Url::parse(base) else {
            tracing::debug!(base = %base, "Unparsable base URL, leaving feed unresolved");
            return;
        };
        resolve_in_place(&base, &mut self.feed_url);
        resolve_in_place(&base, &mut self.next_url);
        for hub in &mut self.hubs {
            resolve_in_place(&base, &mut hub.url);
        }
        for item in &mut self.items {
            resolve_in_place(&base, &mut item.url);
            resolve_in_place(&base, &mut item.external_url);
        }
    }
}

fn resolve_in_place(base: &Url, field: &mut String) {
    if field.is_empty() {
        return;
    }
    if let Ok(resolved) = base.join(field) {
        *field = resolved.to_string();
    }
}

/// Restricts an activity feed to one or more type tags.
///
/// Encodes to a single comma-joined `type` query parameter; an empty query
/// encodes to nothing.
#[derive(Debug, Clone, Default)]
pub struct ActivityFeedQuery {
    types: Vec<String>,
}

impl ActivityFeedQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, tag: impl Into<String>) -> Self {
        self.types.push(tag.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Returns the query pairs to append to the feed URL.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        if self.types.is_empty() {
            Vec::new()
        } else {
            vec![("type", self.types.join(","))]
        }
    }
}

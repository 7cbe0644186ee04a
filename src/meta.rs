//! Link-relation metadata attached to fetched entities.
//!
//! Every response from the API carries out-of-band annotations: either
//! transport headers or a `_metadata` object embedded in the body. Both are
//! folded into a single [`Metadata`] value with case-insensitive keys.
//! The most important accessor is [`Metadata::link`], which resolves a
//! `Link` header-style value by relation name — pagination, feed discovery,
//! and label navigation all hang off it.

use chrono::{DateTime, Utc};
use serde::de::{Deserialize, Deserializer};
use std::collections::HashMap;

/// Canonical link relation names advertised by the API.
pub mod relation {
    pub const SELF: &str = "self";
    pub const NEXT: &str = "next";
    pub const PREV: &str = "prev";
    pub const ALTERNATE: &str = "alternate";
    pub const LABELS: &str = "labels";
    pub const TRIALS: &str = "trials";
    pub const NEXT_TRIAL: &str = "next-trial";
}

/// Maps legacy relation spellings onto their current canonical names.
///
/// Older servers emitted `previous` and vendor-specific URIs from the
/// carbonrelay.com days; both sides of a comparison are canonicalized so a
/// caller asking for [`relation::PREV`] still matches a `rel="previous"`
/// entry. Unrecognized relations pass through unchanged (comparison is
/// case-insensitive at the call sites).
pub fn canonical_link_relation(rel: &str) -> &str {
    if rel.eq_ignore_ascii_case("previous") {
        return relation::PREV;
    }
    if rel.eq_ignore_ascii_case("https://carbonrelay.com/rel/labels")
        || rel.eq_ignore_ascii_case("https://carbonrelay.com/rel/triallabels")
    {
        return relation::LABELS;
    }
    if rel.eq_ignore_ascii_case("https://carbonrelay.com/rel/trials") {
        return relation::TRIALS;
    }
    if rel.eq_ignore_ascii_case("nexttrial")
        || rel.eq_ignore_ascii_case("next-trial")
        || rel.eq_ignore_ascii_case("https://carbonrelay.com/rel/nexttrial")
        || rel.eq_ignore_ascii_case("https://carbonrelay.com/rel/next-trial")
    {
        return relation::NEXT_TRIAL;
    }
    rel
}

/// Multi-valued, case-insensitive mapping of header-like names to values.
///
/// Immutable after construction: all mutation happens in the constructors
/// and in [`Metadata::merge_fallback`], which is only invoked on the decode
/// path before the value is handed out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    values: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// Builds metadata from transport-level response headers.
    ///
    /// Values that are not valid UTF-8 are skipped; header names arrive
    /// already lowercased from reqwest.
    pub fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in headers {
            if let Ok(v) = value.to_str() {
                values
                    .entry(name.as_str().to_ascii_lowercase())
                    .or_default()
                    .push(v.to_string());
            }
        }
        Metadata { values }
    }

    /// Merges `fallback` underneath `self`: keys already present win.
    ///
    /// Used when a response body carries a top-level `_metadata` object —
    /// transport headers take precedence over same-named body entries.
    pub fn merge_fallback(mut self, fallback: Metadata) -> Self {
        for (name, vals) in fallback.values {
            self.values.entry(name).or_insert(vals);
        }
        self
    }

    /// Returns the first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Returns every value recorded for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title")
    }

    pub fn location(&self) -> Option<&str> {
        self.get("location")
    }

    /// Parses the `last-modified` value as an HTTP date (RFC 2822) or,
    /// failing that, RFC 3339. Parse failure yields `None`.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        let raw = self.get("last-modified")?;
        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Returns the target of the first link whose relation matches `rel`.
    ///
    /// `Link` values may be spread across repeated entries or comma-joined
    /// inside a single entry; both forms are scanned in original order and
    /// the first match wins. Relation names on both sides are canonicalized
    /// and compared case-insensitively. Parameters other than `rel` are
    /// ignored.
    pub fn link(&self, rel: &str) -> Option<String> {
        let want = canonical_link_relation(rel);
        for raw in self.get_all("link") {
            for segment in split_link_segments(raw) {
                let Some((target, relations)) = parse_link_segment(segment) else {
                    continue;
                };
                let matched = relations
                    .iter()
                    .any(|r| canonical_link_relation(r).eq_ignore_ascii_case(want));
                if matched {
                    return Some(target.to_string());
                }
            }
        }
        None
    }

    #[cfg(test)]
    fn insert(&mut self, name: &str, value: &str) {
        self.values
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in iter {
            values
                .entry(name.to_ascii_lowercase())
                .or_default()
                .push(value);
        }
        Metadata { values }
    }
}

/// Body-side `_metadata` objects map names to a string or an array of
/// strings; both shapes collapse into the multi-valued form.
impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        let raw = HashMap::<String, OneOrMany>::deserialize(deserializer)?;
        let mut values: HashMap<String, Vec<String>> = HashMap::new();
        for (name, v) in raw {
            let vals = match v {
                OneOrMany::One(s) => vec![s],
                OneOrMany::Many(m) => m,
            };
            values
                .entry(name.to_ascii_lowercase())
                .or_default()
                .extend(vals);
        }
        Ok(Metadata { values })
    }
}

/// Splits a raw `Link` value into `<url>; params` segments on commas that
/// fall outside the angle-bracketed target (URLs may legally contain
/// commas).
fn split_link_segments(value: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_target = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            '<' => in_target = true,
            '>' => in_target = false,
            ',' if !in_target => {
                segments.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&value[start..]);
    segments
}

/// Parses one `<url>; rel=name[; rel=name...]` segment, returning the
/// target and every relation named by a `rel` parameter. A `rel` value may
/// itself hold several space-separated relations.
fn parse_link_segment(segment: &str) -> Option<(&str, Vec<&str>)> {
    let segment = segment.trim();
    let rest = segment.strip_prefix('<')?;
    let close = rest.find('>')?;
    let target = &rest[..close];

    let mut relations = Vec::new();
    for param in rest[close + 1..].split(';') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        if !key.trim().eq_ignore_ascii_case("rel") {
            continue;
        }
        let value = value.trim().trim_matches('"');
        relations.extend(value.split_whitespace());
    }
    Some((target, relations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_link_simple() {
        let mut md = Metadata::default();
        md.insert("Link", r#"<https://example.com/next>; rel=next"#);
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/next")
        );
        assert_eq!(md.link(relation::PREV), None);
    }

    #[test]
    fn test_link_quoted_and_case_insensitive() {
        let mut md = Metadata::default();
        md.insert("link", r#"<https://example.com/a>;rel="Next""#);
        assert_eq!(md.link("NEXT").as_deref(), Some("https://example.com/a"));
    }

    #[test]
    fn test_link_comma_joined_value() {
        let mut md = Metadata::default();
        md.insert(
            "Link",
            r#"<https://example.com/p1>; rel=prev, <https://example.com/p3>; rel=next"#,
        );
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/p3")
        );
        assert_eq!(
            md.link(relation::PREV).as_deref(),
            Some("https://example.com/p1")
        );
    }

    #[test]
    fn test_link_repeated_entries_first_match_wins() {
        let mut md = Metadata::default();
        md.insert("Link", "<https://example.com/first>; rel=next");
        md.insert("Link", "<https://example.com/second>; rel=next");
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/first")
        );
    }

    #[test]
    fn test_link_comma_inside_target() {
        let mut md = Metadata::default();
        md.insert(
            "Link",
            "<https://example.com/q?ids=a,b>; rel=self, <https://example.com/n>; rel=next",
        );
        assert_eq!(
            md.link(relation::SELF).as_deref(),
            Some("https://example.com/q?ids=a,b")
        );
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/n")
        );
    }

    #[test]
    fn test_link_ignores_other_params() {
        let mut md = Metadata::default();
        md.insert(
            "Link",
            r#"<https://example.com/n>; title="Page 2"; rel=next; type=application/json"#,
        );
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/n")
        );
    }

    #[test]
    fn test_link_legacy_previous_resolves_as_prev() {
        let mut md = Metadata::default();
        md.insert("Link", "<https://example.com/p>; rel=previous");
        // Current name, legacy name, and mixed case all resolve identically
        assert_eq!(
            md.link(relation::PREV).as_deref(),
            Some("https://example.com/p")
        );
        assert_eq!(md.link("previous").as_deref(), Some("https://example.com/p"));
        assert_eq!(md.link("Previous").as_deref(), Some("https://example.com/p"));
    }

    #[test]
    fn test_link_multiple_rel_values_in_one_param() {
        let mut md = Metadata::default();
        md.insert("Link", r#"<https://example.com/n>; rel="alternate next""#);
        assert_eq!(
            md.link(relation::NEXT).as_deref(),
            Some("https://example.com/n")
        );
        assert_eq!(
            md.link(relation::ALTERNATE).as_deref(),
            Some("https://example.com/n")
        );
    }

    #[test]
    fn test_canonical_link_relation_legacy_uris() {
        assert_eq!(
            canonical_link_relation("https://carbonrelay.com/rel/labels"),
            relation::LABELS
        );
        assert_eq!(
            canonical_link_relation("https://carbonrelay.com/rel/triallabels"),
            relation::LABELS
        );
        assert_eq!(
            canonical_link_relation("https://carbonrelay.com/rel/trials"),
            relation::TRIALS
        );
        assert_eq!(canonical_link_relation("nexttrial"), relation::NEXT_TRIAL);
        assert_eq!(canonical_link_relation("Next-Trial"), relation::NEXT_TRIAL);
        // Unknown relations pass through with their case preserved
        assert_eq!(canonical_link_relation("Bookmark"), "Bookmark");
    }

    #[test]
    fn test_get_is_case_insensitive() {
        let mut md = Metadata::default();
        md.insert("Title", "My Experiment");
        assert_eq!(md.title(), Some("My Experiment"));
        assert_eq!(md.get("TITLE"), Some("My Experiment"));
    }

    #[test]
    fn test_last_modified_http_date() {
        let mut md = Metadata::default();
        md.insert("Last-Modified", "Wed, 21 Oct 2015 07:28:00 GMT");
        let t = md.last_modified().unwrap();
        assert_eq!(t.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[test]
    fn test_last_modified_unparsable_is_none() {
        let mut md = Metadata::default();
        md.insert("Last-Modified", "not a date");
        assert_eq!(md.last_modified(), None);
    }

    #[test]
    fn test_merge_fallback_headers_win() {
        let headers: Metadata = [
            ("title".to_string(), "From Headers".to_string()),
            ("link".to_string(), "<https://h/next>; rel=next".to_string()),
        ]
        .into_iter()
        .collect();
        let body: Metadata = [
            ("title".to_string(), "From Body".to_string()),
            ("location".to_string(), "https://b/self".to_string()),
        ]
        .into_iter()
        .collect();

        let merged = headers.merge_fallback(body);
        assert_eq!(merged.title(), Some("From Headers"));
        // Keys absent from the headers are filled in from the body
        assert_eq!(merged.location(), Some("https://b/self"));
        assert_eq!(merged.link(relation::NEXT).as_deref(), Some("https://h/next"));
    }

    #[test]
    fn test_deserialize_body_metadata() {
        let md: Metadata = serde_json::from_str(
            r#"{"Title": "Recommended", "Link": ["<https://a>; rel=self", "<https://b>; rel=next"]}"#,
        )
        .unwrap();
        assert_eq!(md.title(), Some("Recommended"));
        assert_eq!(md.link(relation::NEXT).as_deref(), Some("https://b"));
    }
}

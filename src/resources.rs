//! Plain data records for the REST resources and their list envelopes.
//!
//! These carry no behavior of their own beyond what the lister needs: a
//! `_metadata` field populated from the body (per-item metadata has no
//! transport headers to take precedence), and the [`ItemPage`] seam the
//! generic pagination loop drives.

use crate::meta::Metadata;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One page of a server-paginated collection.
///
/// The `next` relation link in [`ItemPage::metadata`] points at the
/// continuation page, if any.
pub trait ItemPage {
    type Item;

    fn metadata(&self) -> &Metadata;

    /// Used by the decode path to install the merged header/body metadata.
    fn metadata_mut(&mut self) -> &mut Metadata;

    fn take_items(&mut self) -> Vec<Self::Item>;
}

macro_rules! item_page {
    ($list:ty, $item:ty, $field:ident) => {
        impl ItemPage for $list {
            type Item = $item;

            fn metadata(&self) -> &Metadata {
                &self.metadata
            }

            fn metadata_mut(&mut self) -> &mut Metadata {
                &mut self.metadata
            }

            fn take_items(&mut self) -> Vec<$item> {
                std::mem::take(&mut self.$field)
            }
        }
    };
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ApplicationItem {
    /// Human-facing label: the title when set, otherwise the name.
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.name
        } else {
            &self.title
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub applications: Vec<ApplicationItem>,
}

item_page!(ApplicationList, ApplicationItem, applications);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub scenarios: Vec<ScenarioItem>,
}

item_page!(ScenarioList, ScenarioItem, scenarios);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub clusters: Vec<ClusterItem>,
}

item_page!(ClusterList, ClusterItem, clusters);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub observations: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExperimentList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub experiments: Vec<ExperimentItem>,
}

item_page!(ExperimentList, ExperimentItem, experiments);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrialItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrialList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub trials: Vec<TrialItem>,
}

item_page!(TrialList, TrialItem, trials);

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationItem {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendationList {
    #[serde(default, rename = "_metadata")]
    pub metadata: Metadata,
    #[serde(default)]
    pub recommendations: Vec<RecommendationItem>,
}

item_page!(RecommendationList, RecommendationItem, recommendations);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::relation;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_decodes_body_metadata_and_items() {
        let mut list: ApplicationList = serde_json::from_str(
            r#"{
                "_metadata": {"Link": "<https://api.example.com/apps?offset=2>; rel=next"},
                "applications": [
                    {"_metadata": {"Title": "My App"}, "name": "my-app", "title": "My App"},
                    {"name": "other-app"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(
            list.metadata().link(relation::NEXT).as_deref(),
            Some("https://api.example.com/apps?offset=2")
        );
        let items = list.take_items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].metadata.title(), Some("My App"));
        assert_eq!(items[0].display_name(), "My App");
        assert_eq!(items[1].display_name(), "other-app");
        assert!(list.take_items().is_empty());
    }
}

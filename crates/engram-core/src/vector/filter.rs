//! Metadata predicates for filtered search

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Tier, VectorRecord};

/// Predicate over vector-item metadata
///
/// All set fields must match (conjunction). An empty filter matches
/// everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetadataFilter {
    /// Exact source match
    pub source: Option<String>,
    /// Exact category match
    pub category: Option<String>,
    /// Every listed tag must be present on the item
    pub tags: Vec<String>,
    /// Inclusive lower bound on the item timestamp
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the item timestamp
    pub date_to: Option<DateTime<Utc>>,
    /// Minimum access count
    pub min_access_count: Option<u64>,
    /// Required tier
    pub tier: Option<Tier>,
    /// Required id prefix (collection scoping)
    pub id_prefix: Option<String>,
}

impl MetadataFilter {
    /// True when no predicate is set
    pub fn is_empty(&self) -> bool {
        self.source.is_none()
            && self.category.is_none()
            && self.tags.is_empty()
            && self.date_from.is_none()
            && self.date_to.is_none()
            && self.min_access_count.is_none()
            && self.tier.is_none()
            && self.id_prefix.is_none()
    }

    /// Evaluate the predicate against a record
    pub fn matches(&self, record: &VectorRecord) -> bool {
        if let Some(source) = &self.source {
            if record.metadata.source.as_deref() != Some(source.as_str()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if record.metadata.category.as_deref() != Some(category.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty()
            && !self
                .tags
                .iter()
                .all(|tag| record.metadata.tags.iter().any(|t| t == tag))
        {
            return false;
        }
        if let Some(from) = self.date_from {
            if record.metadata.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.date_to {
            if record.metadata.timestamp > to {
                return false;
            }
        }
        if let Some(min) = self.min_access_count {
            if record.access_count < min {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if record.tier != tier {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !record.id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::ItemMetadata;

    fn record_with_tags(tags: &[&str]) -> VectorRecord {
        let mut metadata = ItemMetadata::new("text", "kb");
        metadata.tags = tags.iter().map(|t| t.to_string()).collect();
        metadata.source = Some("notes.md".into());
        VectorRecord::new("kb:doc-1", vec![0.0; 64], metadata)
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = MetadataFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&record_with_tags(&[])));
    }

    #[test]
    fn test_tags_are_conjunctive() {
        let record = record_with_tags(&["rust", "graphs"]);

        let mut filter = MetadataFilter::default();
        filter.tags = vec!["rust".into()];
        assert!(filter.matches(&record));

        filter.tags = vec!["rust".into(), "python".into()];
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_id_prefix_scopes_collections() {
        let record = record_with_tags(&[]);

        let mut filter = MetadataFilter::default();
        filter.id_prefix = Some("kb:".into());
        assert!(filter.matches(&record));

        filter.id_prefix = Some("other:".into());
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_min_access_count() {
        let mut record = record_with_tags(&[]);
        record.access_count = 3;

        let mut filter = MetadataFilter::default();
        filter.min_access_count = Some(5);
        assert!(!filter.matches(&record));

        filter.min_access_count = Some(3);
        assert!(filter.matches(&record));
    }
}

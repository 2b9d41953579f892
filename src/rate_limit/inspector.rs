//! Bucket Inspector
//!
//! Read-only views over the registry for operators. Nothing here consumes
//! tokens or counts as bucket activity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::category::Category;
use super::registry::{BucketRegistry, BucketSnapshot};

/// One bucket as shown to operators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketView {
    pub category: Category,
    pub identifier: String,
    pub capacity: u32,
    pub available_tokens: u32,
}

impl From<BucketSnapshot> for BucketView {
    fn from(snapshot: BucketSnapshot) -> Self {
        let BucketSnapshot {
            key,
            capacity,
            available,
        } = snapshot;

        Self {
            category: key.category,
            identifier: key.identifier,
            capacity,
            available_tokens: available,
        }
    }
}

/// Bucket counts for one category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySummary {
    pub category: Category,
    pub buckets: usize,
    pub exhausted: usize,
}

/// Registry-wide summary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectorSummary {
    /// Timestamp of data generation
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Buckets held in the registry
    pub total_buckets: usize,

    /// Buckets with no tokens left
    pub exhausted_buckets: usize,

    /// Breakdown by category, in category order
    pub per_category: Vec<CategorySummary>,
}

/// Read-only view over a bucket registry
#[derive(Debug, Clone)]
pub struct Inspector {
    registry: Arc<BucketRegistry>,
}

impl Inspector {
    /// Create an inspector for a registry
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self { registry }
    }

    /// Every bucket, sorted by category then identifier
    pub fn list_buckets(&self) -> Vec<BucketView> {
        let mut views: Vec<BucketView> = self
            .registry
            .snapshot()
            .into_iter()
            .map(BucketView::from)
            .collect();

        views.sort_by(|a, b| {
            a.category
                .cmp(&b.category)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        views
    }

    /// Count buckets per category and how many are exhausted
    pub fn summary(&self) -> InspectorSummary {
        let views = self.list_buckets();

        let mut per_category: BTreeMap<Category, CategorySummary> = BTreeMap::new();
        for view in &views {
            let entry = per_category
                .entry(view.category)
                .or_insert_with(|| CategorySummary {
                    category: view.category,
                    buckets: 0,
                    exhausted: 0,
                });
            entry.buckets += 1;
            if view.available_tokens == 0 {
                entry.exhausted += 1;
            }
        }

        InspectorSummary {
            timestamp: chrono::Utc::now(),
            total_buckets: views.len(),
            exhausted_buckets: views.iter().filter(|v| v.available_tokens == 0).count(),
            per_category: per_category.into_values().collect(),
        }
    }
}

//! Bucket Registry
//!
//! Concurrent map from `(category, identifier)` to the single token bucket
//! that key owns for the life of the process.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::bucket::{ConsumeOutcome, TokenBucket};
use super::category::Category;
use super::clock::{Clock, MonotonicClock};
use super::config::RateLimitConfig;
use crate::metrics;

/// Key identifying one bucket
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketKey {
    /// Quota tier
    pub category: Category,

    /// Principal name or client address
    pub identifier: String,
}

impl BucketKey {
    /// Create a new bucket key
    pub fn new(category: Category, identifier: impl Into<String>) -> Self {
        Self {
            category,
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.identifier)
    }
}

/// Point-in-time reading of one bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub key: BucketKey,
    pub capacity: u32,
    pub available: u32,
}

/// Registry of every live token bucket
#[derive(Debug)]
pub struct BucketRegistry {
    buckets: DashMap<BucketKey, Arc<TokenBucket>>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
}

impl BucketRegistry {
    /// Create an empty registry using the system clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(MonotonicClock))
    }

    /// Create an empty registry with a custom clock
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
            clock,
        }
    }

    /// Configuration new buckets are created from
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Get or create the bucket for `key`
    ///
    /// Concurrent callers with the same key always receive the same bucket.
    pub fn resolve(&self, key: &BucketKey) -> Arc<TokenBucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.value().clone();
        }

        self.buckets
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!("Creating bucket for {}", key);
                Arc::new(TokenBucket::new(
                    self.config.policy(key.category),
                    self.clock.clone(),
                ))
            })
            .value()
            .clone()
    }

    /// Consume `tokens` from the key's bucket, creating it if needed
    ///
    /// A bucket retired by [`evict_idle`](Self::evict_idle) after it was
    /// resolved refuses the consume; the key is then resolved again, which
    /// yields the replacement bucket.
    pub fn try_consume(&self, key: &BucketKey, tokens: u32) -> ConsumeOutcome {
        loop {
            let outcome = self.resolve(key).try_consume(tokens);
            if !outcome.retired {
                return outcome;
            }
        }
    }

    /// Get a bucket if it exists
    pub fn get(&self, key: &BucketKey) -> Option<Arc<TokenBucket>> {
        self.buckets.get(key).map(|b| b.value().clone())
    }

    /// Read every bucket without consuming
    ///
    /// Each bucket is read independently; the result is not a consistent cut
    /// across keys.
    pub fn snapshot(&self) -> Vec<BucketSnapshot> {
        let entries: Vec<(BucketKey, Arc<TokenBucket>)> = self
            .buckets
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        entries
            .into_iter()
            .map(|(key, bucket)| BucketSnapshot {
                key,
                capacity: bucket.capacity(),
                available: bucket.available_tokens(),
            })
            .collect()
    }

    /// Remove buckets idle for at least `max_idle` that have refilled to capacity
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let retired = bucket.retire_if_idle(max_idle);
            if retired {
                evicted += 1;
            }
            !retired
        });

        if evicted > 0 {
            metrics::BUCKETS_EVICTED_TOTAL.inc_by(evicted as u64);
            tracing::debug!("Evicted {} idle buckets", evicted);
        }

        evicted
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket has been created yet
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

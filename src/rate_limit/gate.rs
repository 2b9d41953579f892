//! Admission Gate
//!
//! Request-facing entry point: one token per call, packaged with the quota
//! metadata the HTTP layer turns into `X-Rate-Limit-*` headers.

use serde::Serialize;
use std::sync::Arc;

use super::category::Category;
use super::error::RateLimitError;
use super::registry::{BucketKey, BucketRegistry};
use crate::metrics;

/// Seconds until the advertised reset
///
/// This is an approximation: the bucket's real refill instant depends on when
/// it was last refilled, not on when the request arrived.
pub const RESET_WINDOW_SECS: i64 = 60;

/// Back-off suggested to denied clients
pub const RETRY_AFTER_SECS: u64 = 60;

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResult {
    /// Whether the request may proceed
    pub allowed: bool,

    /// Category capacity
    pub limit: u32,

    /// Tokens left after this decision
    pub remaining: u32,

    /// Approximate reset time, epoch seconds
    pub reset_at_epoch_secs: i64,
}

impl AdmissionResult {
    /// Suggested wait before retrying, only set on denial
    pub fn retry_after_secs(&self) -> Option<u64> {
        (!self.allowed).then_some(RETRY_AFTER_SECS)
    }

    /// Turn a denial into `RateLimitError::Exceeded`
    pub fn into_result(self, category: Category, identifier: &str) -> Result<Self, RateLimitError> {
        if self.allowed {
            Ok(self)
        } else {
            Err(RateLimitError::Exceeded {
                category,
                identifier: identifier.to_string(),
                retry_after_secs: RETRY_AFTER_SECS,
            })
        }
    }
}

/// Admission controller shared by all request handlers
#[derive(Debug, Clone)]
pub struct AdmissionGate {
    registry: Arc<BucketRegistry>,
}

impl AdmissionGate {
    /// Create a gate over an existing registry
    pub fn new(registry: Arc<BucketRegistry>) -> Self {
        Self { registry }
    }

    /// Registry backing this gate
    pub fn registry(&self) -> &Arc<BucketRegistry> {
        &self.registry
    }

    /// Decide whether `identifier` may perform one `category` operation
    ///
    /// Consumes exactly one token from the key's bucket when allowed. With
    /// rate limiting disabled every request is allowed and no bucket is
    /// touched.
    pub fn admit(&self, identifier: &str, category: Category) -> AdmissionResult {
        let config = self.registry.config();
        let limit = config.limit(category).capacity;
        let reset_at_epoch_secs = chrono::Utc::now().timestamp() + RESET_WINDOW_SECS;

        if !config.enabled {
            return AdmissionResult {
                allowed: true,
                limit,
                remaining: limit,
                reset_at_epoch_secs,
            };
        }

        let key = BucketKey::new(category, identifier);
        let outcome = self.registry.try_consume(&key, 1);

        metrics::record_admission(category.as_str(), outcome.consumed);
        if !outcome.consumed {
            tracing::warn!(
                identifier = %identifier,
                category = %category,
                "Rate limit exceeded"
            );
        }

        AdmissionResult {
            allowed: outcome.consumed,
            limit,
            remaining: outcome.remaining,
            reset_at_epoch_secs,
        }
    }

    /// Like [`admit`](Self::admit), but a denial comes back as an error
    pub fn check(&self, identifier: &str, category: Category) -> Result<AdmissionResult, RateLimitError> {
        self.admit(identifier, category)
            .into_result(category, identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::config::RateLimitConfig;

    fn gate() -> AdmissionGate {
        AdmissionGate::new(Arc::new(BucketRegistry::new(RateLimitConfig::default())))
    }

    #[test]
    fn test_auth_scenario() {
        let gate = gate();

        for expected in [2, 1, 0] {
            let result = gate.admit("u1", Category::Auth);
            assert!(result.allowed);
            assert_eq!(result.limit, 3);
            assert_eq!(result.remaining, expected);
            assert!(result.retry_after_secs().is_none());
        }

        let denied = gate.admit("u1", Category::Auth);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after_secs(), Some(60));
    }

    #[test]
    fn test_category_isolation() {
        let gate = gate();
        for _ in 0..4 {
            gate.admit("u1", Category::Auth);
        }

        let result = gate.admit("u1", Category::General);
        assert!(result.allowed);
        assert_eq!(result.limit, 100);
        assert_eq!(result.remaining, 99);
    }

    #[test]
    fn test_identifier_isolation() {
        let gate = gate();
        for _ in 0..3 {
            gate.admit("u1", Category::Auth);
        }

        let result = gate.admit("u2", Category::Auth);
        assert!(result.allowed);
        assert_eq!(result.remaining, 2);
    }

    #[test]
    fn test_reset_is_about_a_minute_ahead() {
        let before = chrono::Utc::now().timestamp();
        let result = gate().admit("u1", Category::Write);
        let after = chrono::Utc::now().timestamp();

        assert!(result.reset_at_epoch_secs >= before + 60);
        assert!(result.reset_at_epoch_secs <= after + 60);
    }

    #[test]
    fn test_check_returns_error_on_denial() {
        let gate = gate();
        for _ in 0..3 {
            assert!(gate.check("u1", Category::Auth).is_ok());
        }

        let err = gate.check("u1", Category::Auth).unwrap_err();
        assert_eq!(
            err,
            RateLimitError::Exceeded {
                category: Category::Auth,
                identifier: "u1".to_string(),
                retry_after_secs: 60,
            }
        );
    }

    #[test]
    fn test_disabled_allows_all() {
        let registry = Arc::new(BucketRegistry::new(RateLimitConfig::disabled()));
        let gate = AdmissionGate::new(registry.clone());

        for _ in 0..10 {
            assert!(gate.admit("u1", Category::Auth).allowed);
        }
        assert!(registry.is_empty());
    }
}

//! Rate Limit Configuration
//!
//! Per-category capacity and refill settings.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::category::Category;

/// Default limits, in tokens per refill interval
pub const DEFAULT_GENERAL_LIMIT: u32 = 100;
pub const DEFAULT_AUTH_LIMIT: u32 = 3;
pub const DEFAULT_WRITE_LIMIT: u32 = 20;
pub const DEFAULT_ADMIN_LIMIT: u32 = 50;
pub const DEFAULT_UPLOAD_LIMIT: u32 = 10;

/// Default refill interval (one minute)
pub const DEFAULT_REFILL_INTERVAL_SECS: u64 = 60;

/// How a bucket regains tokens
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefillMode {
    /// Once a full interval has passed, add `refill_rate` tokens in one step
    #[default]
    Interval,
    /// Accrue `refill_rate` tokens per interval continuously, in whole tokens
    Smooth,
}

impl std::str::FromStr for RefillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "interval" => Ok(Self::Interval),
            "smooth" => Ok(Self::Smooth),
            _ => Err(format!("Invalid refill mode: {}", s)),
        }
    }
}

/// Capacity and refill rate for one category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLimit {
    /// Maximum tokens (burst capacity)
    pub capacity: u32,

    /// Tokens restored per refill interval
    pub refill_rate: u32,
}

impl CategoryLimit {
    /// Limit whose refill restores the full capacity each interval
    pub const fn per_interval(limit: u32) -> Self {
        Self {
            capacity: limit,
            refill_rate: limit,
        }
    }
}

/// Effective parameters a bucket is created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub capacity: u32,
    pub refill_rate: u32,
    pub refill_interval: Duration,
    pub refill_mode: RefillMode,
}

/// Rate limit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting
    pub enabled: bool,

    /// Token refill interval in seconds
    pub refill_interval_secs: u64,

    /// Refill strategy shared by all categories
    pub refill_mode: RefillMode,

    /// Remove buckets idle for this long (never, if unset)
    pub idle_eviction_secs: Option<u64>,

    pub general: CategoryLimit,
    pub auth: CategoryLimit,
    pub write: CategoryLimit,
    pub admin: CategoryLimit,
    pub upload: CategoryLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            refill_interval_secs: DEFAULT_REFILL_INTERVAL_SECS,
            refill_mode: RefillMode::Interval,
            idle_eviction_secs: None,
            general: CategoryLimit::per_interval(DEFAULT_GENERAL_LIMIT),
            auth: CategoryLimit::per_interval(DEFAULT_AUTH_LIMIT),
            write: CategoryLimit::per_interval(DEFAULT_WRITE_LIMIT),
            admin: CategoryLimit::per_interval(DEFAULT_ADMIN_LIMIT),
            upload: CategoryLimit::per_interval(DEFAULT_UPLOAD_LIMIT),
        }
    }
}

impl RateLimitConfig {
    /// Create a new rate limit configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().apply_env_overrides()
    }

    /// Disable rate limiting (for testing)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Limit configured for a category
    pub fn limit(&self, category: Category) -> CategoryLimit {
        match category {
            Category::General => self.general,
            Category::Auth => self.auth,
            Category::Write => self.write,
            Category::Admin => self.admin,
            Category::Upload => self.upload,
        }
    }

    /// Mutable access to a category's limit
    pub fn limit_mut(&mut self, category: Category) -> &mut CategoryLimit {
        match category {
            Category::General => &mut self.general,
            Category::Auth => &mut self.auth,
            Category::Write => &mut self.write,
            Category::Admin => &mut self.admin,
            Category::Upload => &mut self.upload,
        }
    }

    /// Full policy for buckets of the given category
    pub fn policy(&self, category: Category) -> LimitPolicy {
        let limit = self.limit(category);
        LimitPolicy {
            capacity: limit.capacity,
            refill_rate: limit.refill_rate,
            refill_interval: self.refill_duration(),
            refill_mode: self.refill_mode,
        }
    }

    /// Get refill duration
    pub fn refill_duration(&self) -> Duration {
        Duration::from_secs(self.refill_interval_secs)
    }

    /// Idle time after which buckets may be swept
    pub fn idle_eviction(&self) -> Option<Duration> {
        self.idle_eviction_secs.map(Duration::from_secs)
    }

    /// Apply `QUOTAGATE_*` environment variable overrides
    ///
    /// - QUOTAGATE_RATE_LIMIT_ENABLED
    /// - QUOTAGATE_REFILL_MODE
    /// - QUOTAGATE_<CATEGORY>_CAPACITY
    /// - QUOTAGATE_<CATEGORY>_REFILL_RATE
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using an arbitrary variable lookup
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("QUOTAGATE_RATE_LIMIT_ENABLED") {
            self.enabled = val.parse().unwrap_or(self.enabled);
        }

        if let Some(val) = lookup("QUOTAGATE_REFILL_MODE") {
            match val.parse() {
                Ok(mode) => self.refill_mode = mode,
                Err(e) => tracing::warn!("Ignoring QUOTAGATE_REFILL_MODE: {}", e),
            }
        }

        for category in Category::ALL {
            let limit = self.limit_mut(category);

            if let Some(val) = lookup(&format!("QUOTAGATE_{}_CAPACITY", category)) {
                if let Ok(capacity) = val.parse() {
                    limit.capacity = capacity;
                }
            }

            if let Some(val) = lookup(&format!("QUOTAGATE_{}_REFILL_RATE", category)) {
                if let Ok(rate) = val.parse() {
                    limit.refill_rate = rate;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any category has a zero capacity or refill rate,
    /// or if the refill interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.refill_interval_secs == 0 {
            anyhow::bail!("Refill interval must be > 0 seconds");
        }

        for category in Category::ALL {
            let limit = self.limit(category);
            if limit.capacity == 0 {
                anyhow::bail!("{} capacity must be > 0", category);
            }
            if limit.refill_rate == 0 {
                anyhow::bail!("{} refill rate must be > 0", category);
            }
        }

        // An evicted bucket must be one that would have refilled anyway.
        if let Some(idle) = self.idle_eviction_secs {
            if idle < self.refill_interval_secs {
                anyhow::bail!(
                    "Idle eviction ({}s) must not be shorter than the refill interval ({}s)",
                    idle,
                    self.refill_interval_secs
                );
            }
        }

        Ok(())
    }
}

//! Rate Limiting Module
//!
//! Per-identifier, per-category token-bucket admission control.
//!
//! # Features
//!
//! - Integer token buckets with burst (interval) or trickle (smooth) refill
//! - Lock-sharded registry with atomic get-or-create per key
//! - Five quota tiers: GENERAL, AUTH, WRITE, ADMIN, UPLOAD
//! - Read-only inspector for operators
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Admission Gate                          │
//! │        admit(identifier, category) -> AdmissionResult        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────┐   │
//! │  │        Bucket Registry  (category, identifier)       │   │
//! │  │   ┌──────────┐  ┌──────────┐  ┌──────────┐          │   │
//! │  │   │ AUTH:u1  │  │ AUTH:u2  │  │GENERAL:ip│   ...    │   │
//! │  │   └──────────┘  └──────────┘  └──────────┘          │   │
//! │  └─────────────────────────────────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 Inspector (read-only)                        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod bucket;
pub mod category;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod inspector;
pub mod registry;

pub use bucket::{ConsumeOutcome, TokenBucket};
pub use category::Category;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CategoryLimit, LimitPolicy, RateLimitConfig, RefillMode};
pub use error::RateLimitError;
pub use gate::{AdmissionGate, AdmissionResult};
pub use inspector::{BucketView, Inspector, InspectorSummary};
pub use registry::{BucketKey, BucketRegistry, BucketSnapshot};

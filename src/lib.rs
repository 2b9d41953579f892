//! Quotagate Library
//!
//! Token-bucket admission control for HTTP services: per-identifier,
//! per-category quotas, an axum middleware that enforces them, and an ops
//! server exposing health, metrics and live bucket state.

pub mod config;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod rate_limit;
pub mod server;

pub use config::Config;
pub use rate_limit::{AdmissionGate, AdmissionResult, BucketRegistry, Category, Inspector};

// Prometheus metrics for quotagate
//
// Exposed on the ops server's /metrics endpoint:
// - Admission decisions per category and outcome (counter)
// - Buckets currently held in the served registry (gauge, set at scrape time)
// - Buckets removed by the idle sweep (counter)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref ADMISSIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("quotagate_admissions_total", "Admission decisions by category and outcome"),
        &["category", "outcome"]
    ).expect("Failed to create admissions metric");

    pub static ref BUCKETS_ACTIVE: IntGauge = IntGauge::new(
        "quotagate_buckets_active",
        "Number of token buckets currently held in the registry"
    ).expect("Failed to create active buckets metric");

    pub static ref BUCKETS_EVICTED_TOTAL: IntCounter = IntCounter::new(
        "quotagate_buckets_evicted_total",
        "Total number of idle buckets removed by the sweeper"
    ).expect("Failed to create evicted buckets metric");
}

/// Register all metrics with the registry
///
/// Safe to call more than once; metrics that are already registered are skipped.
pub fn init() -> prometheus::Result<()> {
    register(Box::new(ADMISSIONS_TOTAL.clone()))?;
    register(Box::new(BUCKETS_ACTIVE.clone()))?;
    register(Box::new(BUCKETS_EVICTED_TOTAL.clone()))?;
    Ok(())
}

fn register(collector: Box<dyn prometheus::core::Collector>) -> prometheus::Result<()> {
    match REGISTRY.register(collector) {
        Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Record one admission decision
pub fn record_admission(category: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "denied" };
    ADMISSIONS_TOTAL
        .with_label_values(&[category, outcome])
        .inc();
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_admissions_are_exported() {
        init().unwrap();

        record_admission("AUTH", false);

        let text = gather_metrics().unwrap();
        assert!(text.contains("quotagate_admissions_total"));
        assert!(text.contains("outcome=\"denied\""));
    }
}

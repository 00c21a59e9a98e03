//! Prometheus metrics for store operations
//!
//! - Operation latencies per backend
//! - Error counts
//! - Redis connection status

use lazy_static::lazy_static;
use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Once;
use tracing::info;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref STORE_OP_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("agg_store_operation_seconds", "Store operation duration")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
        &["operation", "store_type"]
    ).expect("valid histogram definition");

    pub static ref STORE_OP_ERRORS: CounterVec = CounterVec::new(
        Opts::new("agg_store_errors_total", "Store operation errors"),
        &["operation", "store_type", "error_type"]
    ).expect("valid counter definition");

    /// Redis connection status (1=connected, 0=disconnected)
    pub static ref REDIS_CONNECTED: Gauge = Gauge::new(
        "agg_store_redis_connected",
        "Redis connection status (1=connected, 0=disconnected)"
    ).expect("valid gauge definition");
}

static INIT: Once = Once::new();

/// Register all metrics with the global registry
pub fn register_metrics() {
    INIT.call_once(|| {
        REGISTRY.register(Box::new(STORE_OP_DURATION.clone())).ok();
        REGISTRY.register(Box::new(STORE_OP_ERRORS.clone())).ok();
        REGISTRY.register(Box::new(REDIS_CONNECTED.clone())).ok();
        info!("Store metrics registered");
    });
}

/// Observes the elapsed time of one store operation when dropped
pub struct OperationTimer {
    operation: &'static str,
    store_type: &'static str,
    start: std::time::Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str, store_type: &'static str) -> Self {
        Self {
            operation,
            store_type,
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        STORE_OP_DURATION
            .with_label_values(&[self.operation, self.store_type])
            .observe(self.start.elapsed().as_secs_f64());
    }
}

pub fn record_store_error(operation: &str, store_type: &str, error_type: &str) {
    STORE_OP_ERRORS
        .with_label_values(&[operation, store_type, error_type])
        .inc();
}

pub fn update_redis_status(connected: bool) {
    REDIS_CONNECTED.set(if connected { 1.0 } else { 0.0 });
}

/// Get metrics as text for Prometheus scraping
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&REGISTRY.gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_twice() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_timer_and_errors_show_up() {
        register_metrics();
        {
            let _timer = OperationTimer::new("read", "memory");
        }
        record_store_error("read", "sqlite", "database");
        let text = gather_metrics();
        assert!(text.contains("agg_store_operation_seconds"));
        assert!(text.contains("agg_store_errors_total"));
    }
}

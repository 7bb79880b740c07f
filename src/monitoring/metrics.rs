//! Prometheus Metrics
//!
//! Per-service registry so independent instances (and tests) never collide
//! on metric names.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Latency buckets in seconds, from sub-millisecond cache hits to slow blob transfers
const DURATION_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

/// Operation and health gauges exported by the ops server
pub struct StorageMetrics {
    registry: Registry,
    operation_duration: HistogramVec,
    operation_errors: IntCounterVec,
    health_status: GaugeVec,
}

impl StorageMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "storage_operation_duration_seconds",
                "Duration of storage manager operations",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )?;
        let operation_errors = IntCounterVec::new(
            Opts::new(
                "storage_operation_errors_total",
                "Storage manager operations that returned an error",
            ),
            &["operation", "kind"],
        )?;
        let health_status = GaugeVec::new(
            Opts::new(
                "storage_health_check_status",
                "Last health probe result per check (1 healthy, 0 error)",
            ),
            &["check"],
        )?;

        registry.register(Box::new(operation_duration.clone()))?;
        registry.register(Box::new(operation_errors.clone()))?;
        registry.register(Box::new(health_status.clone()))?;

        Ok(Self {
            registry,
            operation_duration,
            operation_errors,
            health_status,
        })
    }

    #[inline]
    pub fn observe_duration(&self, operation: &str, elapsed: Duration) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    #[inline]
    pub fn record_error(&self, operation: &str, kind: &str) {
        self.operation_errors
            .with_label_values(&[operation, kind])
            .inc();
    }

    pub fn set_health(&self, check: &str, healthy: bool) {
        self.health_status
            .with_label_values(&[check])
            .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Error count for one operation across all kinds
    pub fn error_count(&self, operation: &str) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == "storage_operation_errors_total")
            .flat_map(|family| family.get_metric().iter())
            .filter(|metric| {
                metric
                    .get_label()
                    .iter()
                    .any(|label| label.get_name() == "operation" && label.get_value() == operation)
            })
            .map(|metric| metric.get_counter().get_value() as u64)
            .sum()
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics output is not UTF-8: {}", e)))
    }
}

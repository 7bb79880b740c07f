//! Monitoring
//!
//! Operation metrics, store health probes and alerting.

pub mod health;
pub mod http;
pub mod metrics;
pub mod service;

pub use health::{HealthChecks, HealthStatus, ProbeResult, ProbeStatus, SystemHealth};
pub use http::{HttpUpstreamProbe, WebhookAlertSink, WebhookConfig};
pub use metrics::StorageMetrics;
pub use service::{
    MonitoringService, METRIC_OPERATION_DURATION, METRIC_OPERATION_ERROR, METRIC_UPSTREAM_LATENCY,
};

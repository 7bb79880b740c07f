//! Monitoring Service
//!
//! Records operation latency and errors, probes every backing store plus the
//! upstream API, and raises alerts. Metric and alert persistence is
//! best-effort: nothing here fails the caller because monitoring is down.
//! Metric samples are written by background tasks so the operation being
//! measured never waits on the metrics table; [`MonitoringService::flush`]
//! waits for the queued writes.

use crate::best_effort::best_effort;
use crate::blob::BlobStore;
use crate::cache::CacheStore;
use crate::config::MonitoringConfig;
use crate::domain::{
    Alert, AlertSeverity, AlertSinkRef, HealthCheckRecord, MetricSample, NewAlert, Tags,
    UpstreamProbeRef,
};
use crate::durable::DurableStore;
use crate::error::{Error, Result};
use crate::monitoring::health::{HealthChecks, ProbeResult, SystemHealth};
use crate::monitoring::http::{HttpUpstreamProbe, WebhookAlertSink, WebhookConfig};
use crate::monitoring::metrics::StorageMetrics;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Metric name for operation latency samples (milliseconds)
pub const METRIC_OPERATION_DURATION: &str = "operation.duration_ms";

/// Metric name for operation error samples
pub const METRIC_OPERATION_ERROR: &str = "operation.error";

/// Metric name for upstream probe latency samples (milliseconds)
pub const METRIC_UPSTREAM_LATENCY: &str = "upstream.latency_ms";

/// Monitoring over the three stores and the upstream dependency
pub struct MonitoringService {
    durable: DurableStore,
    cache: CacheStore,
    blob: BlobStore,
    upstream: Option<UpstreamProbeRef>,
    alert_sink: Option<AlertSinkRef>,
    metrics: StorageMetrics,
    pending: TaskTracker,
    config: MonitoringConfig,
}

impl MonitoringService {
    pub fn new(
        durable: DurableStore,
        cache: CacheStore,
        blob: BlobStore,
        config: MonitoringConfig,
    ) -> Result<Self> {
        Ok(Self {
            durable,
            cache,
            blob,
            upstream: None,
            alert_sink: None,
            metrics: StorageMetrics::new()?,
            pending: TaskTracker::new(),
            config,
        })
    }

    /// Build with the HTTP probe and webhook sink named in the config
    pub fn from_config(
        durable: DurableStore,
        cache: CacheStore,
        blob: BlobStore,
        config: MonitoringConfig,
    ) -> Result<Self> {
        let upstream = config
            .upstream_url
            .as_deref()
            .map(|url| HttpUpstreamProbe::new(url, config.probe_timeout()))
            .transpose()?;
        let sink = config
            .alert_webhook_url
            .as_deref()
            .map(|url| WebhookAlertSink::new(WebhookConfig::new(url)))
            .transpose()?;

        let mut service = Self::new(durable, cache, blob, config)?;
        if let Some(probe) = upstream {
            service = service.with_upstream(Arc::new(probe));
        }
        if let Some(sink) = sink {
            service = service.with_alert_sink(Arc::new(sink));
        }
        Ok(service)
    }

    pub fn with_upstream(mut self, probe: UpstreamProbeRef) -> Self {
        self.upstream = Some(probe);
        self
    }

    pub fn with_alert_sink(mut self, sink: AlertSinkRef) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn metrics(&self) -> &StorageMetrics {
        &self.metrics
    }

    // =========================================================================
    // Metrics
    // =========================================================================

    /// Queue one metric sample for persistence; failures are logged only
    pub fn track_metric(&self, name: &str, value: f64, tags: &Tags) {
        let durable = self.durable.clone();
        let name = name.to_string();
        let tags = tags.clone();
        self.pending.spawn(async move {
            best_effort(
                "monitoring.track_metric",
                durable.insert_metric(&name, value, &tags),
            )
            .await;
        });
    }

    /// Wait until every queued metric sample has been written (or dropped)
    pub async fn flush(&self) {
        self.pending.close();
        self.pending.wait().await;
        self.pending.reopen();
    }

    /// Record an operation's latency
    pub fn track_performance(&self, operation: &str, elapsed: Duration, tags: &Tags) {
        self.metrics.observe_duration(operation, elapsed);

        let mut tags = tags.clone();
        tags.insert("operation".into(), operation.to_string());
        self.track_metric(METRIC_OPERATION_DURATION, elapsed.as_secs_f64() * 1000.0, &tags);
    }

    /// Record a failed operation
    pub fn track_error(&self, operation: &str, err: &Error, tags: &Tags) {
        let kind = err.label();
        self.metrics.record_error(operation, kind);

        let mut tags = tags.clone();
        tags.insert("operation".into(), operation.to_string());
        tags.insert("kind".into(), kind.to_string());
        tags.insert("error".into(), err.to_string());
        self.track_metric(METRIC_OPERATION_ERROR, 1.0, &tags);
    }

    pub async fn get_metrics(
        &self,
        name: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MetricSample>> {
        self.durable.list_metrics(name, since, limit).await
    }

    /// Prometheus text exposition of the in-process series
    pub fn render_prometheus(&self) -> Result<String> {
        self.metrics.render()
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    /// Persist an alert; critical alerts are also forwarded to the sink.
    ///
    /// Returns `None` when the alert could not be persisted. A critical alert
    /// is forwarded even then.
    pub async fn raise_alert(&self, new: NewAlert) -> Option<Alert> {
        let mut stored = best_effort("monitoring.raise_alert", self.durable.insert_alert(&new)).await;

        match new.severity {
            AlertSeverity::Critical => {
                error!(title = %new.title, message = %new.message, "Critical alert raised");
                let outgoing = stored.clone().unwrap_or_else(|| Alert {
                    // never persisted
                    id: 0,
                    severity: new.severity,
                    title: new.title.clone(),
                    message: new.message.clone(),
                    tags: new.tags.clone(),
                    created_at: Utc::now(),
                    notified: false,
                });

                if self.notify(&outgoing).await {
                    if let Some(alert) = stored.as_mut() {
                        best_effort(
                            "monitoring.mark_alert_notified",
                            self.durable.mark_alert_notified(alert.id),
                        )
                        .await;
                        alert.notified = true;
                    }
                }
            }
            AlertSeverity::Warning | AlertSeverity::Error => {
                warn!(severity = %new.severity, title = %new.title, "Alert raised");
            }
            AlertSeverity::Info => {
                info!(title = %new.title, "Alert raised");
            }
        }

        stored
    }

    async fn notify(&self, alert: &Alert) -> bool {
        let Some(sink) = &self.alert_sink else {
            debug!(title = %alert.title, "No alert sink configured");
            return false;
        };
        best_effort("monitoring.notify", sink.notify(alert)).await.is_some()
    }

    pub async fn get_alerts(
        &self,
        min_severity: Option<AlertSeverity>,
        limit: u32,
    ) -> Result<Vec<Alert>> {
        self.durable.list_alerts(min_severity, limit).await
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Probe every subsystem concurrently. Never fails: a failing probe marks
    /// its own check `error` and the overall status `degraded`.
    pub async fn check_system_health(&self) -> SystemHealth {
        let timeout = self.config.probe_timeout();

        let (database, cache, r2, api) = tokio::join!(
            timed_probe("database", timeout, self.durable.ping()),
            timed_probe("cache", timeout, self.cache.probe()),
            timed_probe("r2", timeout, self.blob.probe()),
            self.probe_upstream(timeout),
        );

        let health = SystemHealth::from_checks(HealthChecks {
            database,
            cache,
            r2,
            api,
        });

        for (name, result) in health.checks.iter() {
            self.metrics.set_health(name, !result.is_error());
        }
        if let Ok(report) = serde_json::to_value(&health) {
            best_effort(
                "monitoring.persist_health",
                self.durable.insert_health_check(health.status.as_str(), &report),
            )
            .await;
        }
        self.alert_on_health(&health).await;

        info!(status = health.status.as_str(), "System health checked");
        health
    }

    async fn probe_upstream(&self, timeout: Duration) -> ProbeResult {
        let Some(upstream) = &self.upstream else {
            return ProbeResult::skipped();
        };

        let result = timed_probe("api", timeout, upstream.probe()).await;
        if !result.is_error() {
            self.track_metric(
                METRIC_UPSTREAM_LATENCY,
                result.latency_ms as f64,
                &crate::domain::tags([("target", upstream.target())]),
            );
        }
        result
    }

    async fn alert_on_health(&self, health: &SystemHealth) {
        for (name, result) in health.checks.iter() {
            if result.is_error() {
                let severity = if name == "database" {
                    AlertSeverity::Critical
                } else {
                    AlertSeverity::Warning
                };
                self.raise_alert(NewAlert {
                    severity,
                    title: format!("{} health check failed", name),
                    message: result.error.clone().unwrap_or_default(),
                    tags: crate::domain::tags([("check", name)]),
                })
                .await;
            }
        }

        let api = &health.checks.api;
        if !api.is_error() && api.latency_ms > self.config.upstream_latency_warn_ms {
            self.raise_alert(NewAlert {
                severity: AlertSeverity::Warning,
                title: "Upstream API slow".into(),
                message: format!(
                    "Upstream responded in {}ms (threshold {}ms)",
                    api.latency_ms, self.config.upstream_latency_warn_ms
                ),
                tags: crate::domain::tags([("check", "api")]),
            })
            .await;
        }
    }

    pub async fn get_health_history(&self, limit: u32) -> Result<Vec<HealthCheckRecord>> {
        self.durable.list_health_checks(limit).await
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Health check and retention cleanup on every tick until cancelled
    pub async fn run_periodic(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval_secs = interval.as_secs(), "Monitoring loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Monitoring loop stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.check_system_health().await;
                    best_effort("monitoring.cleanup", self.durable.cleanup()).await;
                }
            }
        }
    }
}

/// Run one probe under a timeout, measuring its latency
async fn timed_probe<F>(name: &'static str, timeout: Duration, probe: F) -> ProbeResult
where
    F: Future<Output = Result<()>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, probe).await;
    let elapsed = started.elapsed();

    match outcome {
        Ok(Ok(())) => ProbeResult::healthy(elapsed),
        Ok(Err(e)) => {
            warn!(check = name, error = %e, "Health probe failed");
            ProbeResult::error(elapsed, e.to_string())
        }
        Err(_) => {
            let e = Error::Timeout {
                operation: format!("{} probe", name),
                millis: timeout.as_millis() as u64,
            };
            warn!(check = name, error = %e, "Health probe timed out");
            ProbeResult::error(elapsed, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tags;
    use crate::monitoring::health::{HealthStatus, ProbeStatus};
    use crate::testing::{self, FlakyObjectStore, RecordingAlertSink, StubUpstream};

    async fn service_with_blob(blob: Arc<FlakyObjectStore>) -> MonitoringService {
        let durable = DurableStore::in_memory().await.unwrap();
        MonitoringService::new(
            durable,
            testing::memory_cache(),
            BlobStore::new(blob),
            MonitoringConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_blob_probe_failure_degrades_only_r2() {
        let blob = Arc::new(FlakyObjectStore::new());
        let service = service_with_blob(blob.clone())
            .await
            .with_upstream(Arc::new(StubUpstream::healthy()));
        blob.fail_all(true);

        let health = service.check_system_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.r2.status, ProbeStatus::Error);
        assert_eq!(health.checks.database.status, ProbeStatus::Healthy);
        assert_eq!(health.checks.cache.status, ProbeStatus::Healthy);
        assert_eq!(health.checks.api.status, ProbeStatus::Healthy);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["checks"]["r2"]["status"], "error");

        let history = service.get_health_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, "degraded");

        let alerts = service.get_alerts(None, 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[tokio::test]
    async fn test_unconfigured_upstream_is_skipped() {
        let service = service_with_blob(Arc::new(FlakyObjectStore::new())).await;
        let health = service.check_system_health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.api.status, ProbeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_failing_upstream_probe() {
        let service = service_with_blob(Arc::new(FlakyObjectStore::new()))
            .await
            .with_upstream(Arc::new(StubUpstream::failing("503 Service Unavailable")));

        let health = service.check_system_health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.checks.api.status, ProbeStatus::Error);
        assert!(health.checks.api.error.as_deref().unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_slow_upstream_raises_warning() {
        let mut config = MonitoringConfig::default();
        config.upstream_latency_warn_ms = 10;
        let service = MonitoringService::new(
            DurableStore::in_memory().await.unwrap(),
            testing::memory_cache(),
            BlobStore::new(Arc::new(FlakyObjectStore::new())),
            config,
        )
        .unwrap()
        .with_upstream(Arc::new(StubUpstream::slow(Duration::from_millis(40))));

        let health = service.check_system_health().await;
        assert_eq!(health.checks.api.status, ProbeStatus::Healthy);

        let alerts = service.get_alerts(Some(AlertSeverity::Warning), 10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Upstream API slow");
    }

    #[tokio::test]
    async fn test_only_critical_alerts_are_forwarded() {
        let sink = Arc::new(RecordingAlertSink::default());
        let service = service_with_blob(Arc::new(FlakyObjectStore::new()))
            .await
            .with_alert_sink(sink.clone());

        let warning = service
            .raise_alert(NewAlert {
                severity: AlertSeverity::Warning,
                title: "cache slow".into(),
                message: "p99 over budget".into(),
                tags: Tags::new(),
            })
            .await
            .unwrap();
        assert!(!warning.notified);
        assert!(sink.delivered().is_empty());

        let critical = service
            .raise_alert(NewAlert {
                severity: AlertSeverity::Critical,
                title: "database down".into(),
                message: "connection refused".into(),
                tags: tags([("check", "database")]),
            })
            .await
            .unwrap();
        assert!(critical.notified);
        assert_eq!(sink.delivered().len(), 1);
        assert_eq!(sink.delivered()[0].title, "database down");

        let stored = service.get_alerts(Some(AlertSeverity::Critical), 10).await.unwrap();
        assert!(stored[0].notified);
    }

    #[tokio::test]
    async fn test_track_error_counts_and_persists() {
        let service = service_with_blob(Arc::new(FlakyObjectStore::new())).await;
        let err = Error::BlobNotFound { key: "a/b/c".into() };
        service.track_error("get_file", &err, &tags([("tenant_id", "g1")]));
        service.track_performance("get_file", Duration::from_millis(5), &Tags::new());

        assert_eq!(service.metrics().error_count("get_file"), 1);
        service.flush().await;
        let errors = service
            .get_metrics(Some(METRIC_OPERATION_ERROR), None, 10)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tags["kind"], "not_found");
        assert_eq!(errors[0].tags["tenant_id"], "g1");

        let text = service.render_prometheus().unwrap();
        assert!(text.contains("operation=\"get_file\""));
    }

    #[tokio::test]
    async fn test_periodic_loop_stops_on_cancel() {
        let service = Arc::new(service_with_blob(Arc::new(FlakyObjectStore::new())).await);
        let cancel = CancellationToken::new();
        let handle = {
            let service = service.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                service.run_periodic(Duration::from_millis(10), cancel).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert!(!service.get_health_history(100).await.unwrap().is_empty());
    }
}

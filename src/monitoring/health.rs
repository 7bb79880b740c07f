//! Health check results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Healthy,
    Error,
    /// Probe not configured; does not degrade overall status
    Skipped,
}

/// Overall system status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        }
    }
}

/// Result of one probe with its own timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub status: ProbeStatus,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn healthy(latency: Duration) -> Self {
        Self {
            status: ProbeStatus::Healthy,
            latency_ms: latency.as_millis() as u64,
            error: None,
        }
    }

    pub fn error(latency: Duration, error: impl Into<String>) -> Self {
        Self {
            status: ProbeStatus::Error,
            latency_ms: latency.as_millis() as u64,
            error: Some(error.into()),
        }
    }

    pub fn skipped() -> Self {
        Self {
            status: ProbeStatus::Skipped,
            latency_ms: 0,
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ProbeStatus::Error
    }
}

/// One result per subsystem; `r2` is the blob store, `api` the upstream dependency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthChecks {
    pub database: ProbeResult,
    pub cache: ProbeResult,
    pub r2: ProbeResult,
    pub api: ProbeResult,
}

impl HealthChecks {
    /// `(name, result)` pairs in a fixed order
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ProbeResult)> {
        [
            ("database", &self.database),
            ("cache", &self.cache),
            ("r2", &self.r2),
            ("api", &self.api),
        ]
        .into_iter()
    }
}

/// Aggregated health report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
}

impl SystemHealth {
    /// Degraded as soon as any probe reports an error
    pub fn from_checks(checks: HealthChecks) -> Self {
        let status = if checks.iter().any(|(_, result)| result.is_error()) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            timestamp: Utc::now(),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_probe_keeps_healthy() {
        let ok = ProbeResult::healthy(Duration::from_millis(2));
        let health = SystemHealth::from_checks(HealthChecks {
            database: ok.clone(),
            cache: ok.clone(),
            r2: ok,
            api: ProbeResult::skipped(),
        });
        assert_eq!(health.status, HealthStatus::Healthy);

        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["checks"]["api"]["status"], "skipped");
        assert_eq!(json["checks"]["database"]["latencyMs"], 2);
        assert!(json["checks"]["database"].get("error").is_none());
    }
}

//! Operational records
//!
//! Rows owned by monitoring: metric samples, alerts and health-check history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::models::Tags;
use crate::error::Error;

/// Alert severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    /// Numeric rank stored alongside the label so queries can filter by level
    pub fn rank(&self) -> i64 {
        match self {
            AlertSeverity::Info => 0,
            AlertSeverity::Warning => 1,
            AlertSeverity::Error => 2,
            AlertSeverity::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Error => "error",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" | "warn" => Ok(AlertSeverity::Warning),
            "error" => Ok(AlertSeverity::Error),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(Error::Validation(format!("Unknown alert severity: {}", other))),
        }
    }
}

/// One recorded metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: i64,
    pub name: String,
    pub value: f64,
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
}

/// Input for raising an alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAlert {
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub tags: Tags,
}

/// A persisted alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
    /// Whether the alert was delivered to the notification sink
    pub notified: bool,
}

/// A persisted health-check run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckRecord {
    pub id: i64,
    pub status: String,
    pub report: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(AlertSeverity::Critical > AlertSeverity::Warning);
        assert_eq!("WARN".parse::<AlertSeverity>().unwrap(), AlertSeverity::Warning);
        assert_eq!(AlertSeverity::Error.rank(), 2);
    }
}

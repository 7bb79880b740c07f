//! Operational tables
//!
//! Metric samples, alerts, health-check history and backup metadata. These
//! rows belong to monitoring and backup, not to tenants.

use crate::domain::{
    Alert, AlertSeverity, BackupSnapshot, HealthCheckRecord, MetricSample, NewAlert, Tags,
};
use crate::durable::codec::{self, from_millis, now_millis, to_millis};
use crate::durable::DurableStore;
use crate::error::Result;
use chrono::{DateTime, Utc};

const BACKUP_COLUMNS: &str = "location, tenant_id, kind, size_bytes, created_at";

impl DurableStore {
    // =========================================================================
    // Metrics
    // =========================================================================

    pub async fn insert_metric(&self, name: &str, value: f64, tags: &Tags) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO metrics (name, value, tags, created_at) VALUES (?, ?, ?, ?)")
                .bind(name)
                .bind(value)
                .bind(serde_json::to_string(tags)?)
                .bind(now_millis())
                .execute(self.pool())
                .await?;
        Ok(result.last_insert_rowid())
    }

    /// Newest samples first, optionally filtered by name and start time
    pub async fn list_metrics(
        &self,
        name: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<Vec<MetricSample>> {
        let rows = sqlx::query(
            "SELECT id, name, value, tags, created_at FROM metrics \
             WHERE (? IS NULL OR name = ?) AND created_at >= ? \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(name)
        .bind(name)
        .bind(since.map(to_millis).unwrap_or(i64::MIN))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(sample) = codec::decode_metric(row)? {
                samples.push(sample);
            }
        }
        Ok(samples)
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    pub async fn insert_alert(&self, alert: &NewAlert) -> Result<Alert> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO alerts (severity, severity_rank, title, message, tags, notified, created_at) \
             VALUES (?, ?, ?, ?, ?, 0, ?)",
        )
        .bind(alert.severity.as_str())
        .bind(alert.severity.rank())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(serde_json::to_string(&alert.tags)?)
        .bind(now)
        .execute(self.pool())
        .await?;

        Ok(Alert {
            id: result.last_insert_rowid(),
            severity: alert.severity,
            title: alert.title.clone(),
            message: alert.message.clone(),
            tags: alert.tags.clone(),
            created_at: from_millis(now),
            notified: false,
        })
    }

    pub async fn mark_alert_notified(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE alerts SET notified = 1 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Newest alerts first at or above `min_severity`
    pub async fn list_alerts(
        &self,
        min_severity: Option<AlertSeverity>,
        limit: u32,
    ) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            "SELECT id, severity, title, message, tags, notified, created_at FROM alerts \
             WHERE severity_rank >= ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(min_severity.map(|s| s.rank()).unwrap_or(0))
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(alert) = codec::decode_alert(row)? {
                alerts.push(alert);
            }
        }
        Ok(alerts)
    }

    // =========================================================================
    // Health History
    // =========================================================================

    pub async fn insert_health_check(&self, status: &str, report: &serde_json::Value) -> Result<i64> {
        let result =
            sqlx::query("INSERT INTO health_checks (status, report, created_at) VALUES (?, ?, ?)")
                .bind(status)
                .bind(serde_json::to_string(report)?)
                .bind(now_millis())
                .execute(self.pool())
                .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_health_checks(&self, limit: u32) -> Result<Vec<HealthCheckRecord>> {
        let rows = sqlx::query(
            "SELECT id, status, report, created_at FROM health_checks \
             ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        let mut checks = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(check) = codec::decode_health_check(row)? {
                checks.push(check);
            }
        }
        Ok(checks)
    }

    // =========================================================================
    // Backup Metadata
    // =========================================================================

    pub async fn insert_backup(&self, snapshot: &BackupSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO backups (location, tenant_id, kind, size_bytes, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&snapshot.location)
        .bind(&snapshot.tenant_id)
        .bind(snapshot.kind.to_string())
        .bind(i64::try_from(snapshot.size_bytes).unwrap_or(i64::MAX))
        .bind(to_millis(snapshot.created_at))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_backup(&self, location: &str) -> Result<Option<BackupSnapshot>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM backups WHERE location = ?",
            BACKUP_COLUMNS
        ))
        .bind(location)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => codec::decode_backup(&row),
            None => Ok(None),
        }
    }

    /// Backups of a tenant, newest first
    pub async fn list_backups(&self, tenant_id: &str) -> Result<Vec<BackupSnapshot>> {
        self.backups_before(tenant_id, None).await
    }

    /// Backups of a tenant created strictly before `cutoff`, newest first
    pub async fn list_backups_before(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<BackupSnapshot>> {
        self.backups_before(tenant_id, Some(cutoff)).await
    }

    async fn backups_before(
        &self,
        tenant_id: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<Vec<BackupSnapshot>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM backups WHERE tenant_id = ? AND created_at < ? \
             ORDER BY created_at DESC, location DESC",
            BACKUP_COLUMNS
        ))
        .bind(tenant_id)
        .bind(cutoff.map(to_millis).unwrap_or(i64::MAX))
        .fetch_all(self.pool())
        .await?;

        let mut backups = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(backup) = codec::decode_backup(row)? {
                backups.push(backup);
            }
        }
        Ok(backups)
    }

    pub async fn delete_backup(&self, location: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM backups WHERE location = ?")
            .bind(location)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

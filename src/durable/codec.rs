//! Row codecs
//!
//! Conversions between SQLite rows and domain records. JSON columns that do
//! not parse make the whole record unreadable: the decoder logs the row at
//! error level and yields `None` so callers treat it as absent.

use crate::domain::{
    AlertSeverity, Alert, BackupSnapshot, ConnectionRecord, EconomyAccount, EconomyTransaction,
    HealthCheckRecord, MemberRecord, MessageRecord, MetricSample, TenantRecord,
    VerificationRecord,
};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::error;

// =============================================================================
// Time Helpers
// =============================================================================

/// Convert to the stored millisecond representation
#[inline]
pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert from the stored millisecond representation
#[inline]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

/// Current time truncated to stored precision
#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// JSON Columns
// =============================================================================

/// Parse a JSON column, logging and returning `None` on failure
pub fn parse_json<T: DeserializeOwned>(table: &str, column: &str, row_key: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            error!(
                table,
                column,
                row = row_key,
                error = %e,
                "Unparseable JSON column, skipping record"
            );
            None
        }
    }
}

// =============================================================================
// Entity Decoders
// =============================================================================

pub fn decode_tenant(row: &SqliteRow) -> Result<Option<TenantRecord>> {
    let id: String = row.try_get("id")?;
    let settings_raw: String = row.try_get("settings")?;
    let channels_raw: String = row.try_get("channels")?;
    let roles_raw: String = row.try_get("roles")?;

    let (Some(settings), Some(channels), Some(roles)) = (
        parse_json("tenants", "settings", &id, &settings_raw),
        parse_json("tenants", "channels", &id, &channels_raw),
        parse_json("tenants", "roles", &id, &roles_raw),
    ) else {
        return Ok(None);
    };

    Ok(Some(TenantRecord {
        name: row.try_get("name")?,
        settings,
        channels,
        roles,
        premium_until: row.try_get::<Option<i64>, _>("premium_until")?.map(from_millis),
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
        id,
    }))
}

pub fn decode_member(row: &SqliteRow) -> Result<Option<MemberRecord>> {
    let id: String = row.try_get("id")?;
    let tenant_id: String = row.try_get("tenant_id")?;
    let row_key = format!("{}/{}", tenant_id, id);
    let roles_raw: String = row.try_get("roles")?;
    let settings_raw: String = row.try_get("settings")?;

    let (Some(roles), Some(settings)) = (
        parse_json("members", "roles", &row_key, &roles_raw),
        parse_json("members", "settings", &row_key, &settings_raw),
    ) else {
        return Ok(None);
    };

    Ok(Some(MemberRecord {
        id,
        tenant_id,
        joined_at: from_millis(row.try_get("joined_at")?),
        verified_at: row.try_get::<Option<i64>, _>("verified_at")?.map(from_millis),
        roles,
        settings,
    }))
}

pub fn decode_message(row: &SqliteRow) -> Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_id: row.try_get("channel_id")?,
        author_id: row.try_get("author_id")?,
        content: row.try_get("content")?,
        kind: row.try_get("kind")?,
        created_at: from_millis(row.try_get("created_at")?),
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

pub fn decode_connection(row: &SqliteRow) -> Result<ConnectionRecord> {
    Ok(ConnectionRecord {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_id: row.try_get("channel_id")?,
        target_tenant_id: row.try_get("target_tenant_id")?,
        target_channel_id: row.try_get("target_channel_id")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub fn decode_economy_account(row: &SqliteRow) -> Result<EconomyAccount> {
    Ok(EconomyAccount {
        tenant_id: row.try_get("tenant_id")?,
        member_id: row.try_get("member_id")?,
        balance: row.try_get("balance")?,
        bank: row.try_get("bank")?,
        updated_at: from_millis(row.try_get("updated_at")?),
    })
}

pub fn decode_economy_transaction(row: &SqliteRow) -> Result<EconomyTransaction> {
    Ok(EconomyTransaction {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        member_id: row.try_get("member_id")?,
        amount: row.try_get("amount")?,
        kind: row.try_get("kind")?,
        description: row.try_get("description")?,
        created_at: from_millis(row.try_get("created_at")?),
    })
}

pub fn decode_verification(row: &SqliteRow) -> Result<Option<VerificationRecord>> {
    let status_raw: String = row.try_get("status")?;
    let member_id: String = row.try_get("member_id")?;
    let tenant_id: String = row.try_get("tenant_id")?;

    let status = match status_raw.parse() {
        Ok(status) => status,
        Err(e) => {
            error!(
                table = "verifications",
                row = %format!("{}/{}", tenant_id, member_id),
                error = %e,
                "Unknown verification status, skipping record"
            );
            return Ok(None);
        }
    };

    Ok(Some(VerificationRecord {
        member_id,
        tenant_id,
        status,
        method: row.try_get("method")?,
        attempts: row.try_get::<i64, _>("attempts")?.max(0) as u32,
        created_at: from_millis(row.try_get("created_at")?),
        completed_at: row.try_get::<Option<i64>, _>("completed_at")?.map(from_millis),
    }))
}

pub fn decode_backup(row: &SqliteRow) -> Result<Option<BackupSnapshot>> {
    let location: String = row.try_get("location")?;
    let kind_raw: String = row.try_get("kind")?;
    let Ok(kind) = kind_raw.parse() else {
        error!(table = "backups", row = %location, kind = %kind_raw, "Unknown backup kind, skipping record");
        return Ok(None);
    };

    Ok(Some(BackupSnapshot {
        tenant_id: row.try_get("tenant_id")?,
        kind,
        size_bytes: row.try_get::<i64, _>("size_bytes")?.max(0) as u64,
        created_at: from_millis(row.try_get("created_at")?),
        location,
    }))
}

// =============================================================================
// Operational Decoders
// =============================================================================

pub fn decode_metric(row: &SqliteRow) -> Result<Option<MetricSample>> {
    let id: i64 = row.try_get("id")?;
    let tags_raw: String = row.try_get("tags")?;
    let Some(tags) = parse_json("metrics", "tags", &id.to_string(), &tags_raw) else {
        return Ok(None);
    };

    Ok(Some(MetricSample {
        id,
        name: row.try_get("name")?,
        value: row.try_get("value")?,
        tags,
        created_at: from_millis(row.try_get("created_at")?),
    }))
}

pub fn decode_alert(row: &SqliteRow) -> Result<Option<Alert>> {
    let id: i64 = row.try_get("id")?;
    let tags_raw: String = row.try_get("tags")?;
    let severity_raw: String = row.try_get("severity")?;

    let Some(tags) = parse_json("alerts", "tags", &id.to_string(), &tags_raw) else {
        return Ok(None);
    };
    let severity: AlertSeverity = match severity_raw.parse() {
        Ok(s) => s,
        Err(e) => {
            error!(table = "alerts", row = id, error = %e, "Unknown alert severity, skipping record");
            return Ok(None);
        }
    };

    Ok(Some(Alert {
        id,
        severity,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        tags,
        created_at: from_millis(row.try_get("created_at")?),
        notified: row.try_get::<i64, _>("notified")? != 0,
    }))
}

pub fn decode_health_check(row: &SqliteRow) -> Result<Option<HealthCheckRecord>> {
    let id: i64 = row.try_get("id")?;
    let report_raw: String = row.try_get("report")?;
    let Some(report) = parse_json("health_checks", "report", &id.to_string(), &report_raw) else {
        return Ok(None);
    };

    Ok(Some(HealthCheckRecord {
        id,
        status: row.try_get("status")?,
        report,
        created_at: from_millis(row.try_get("created_at")?),
    }))
}

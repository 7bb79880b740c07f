//! Domain records
//!
//! Typed forms of every row the storage layer persists. JSON-shaped columns
//! (settings, role and channel lists) are explicit structs here and are only
//! serialized at the durable-store boundary.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Message kind tag for ordinary channel messages
pub const MESSAGE_KIND_DEFAULT: &str = "message";

/// Message kind tag for conversational logs kept by chat features
pub const MESSAGE_KIND_CONVERSATION: &str = "conversation";

// =============================================================================
// Tenant
// =============================================================================

/// Per-tenant settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub prefix: Option<String>,
    pub locale: Option<String>,
    pub log_channel_id: Option<String>,
    pub welcome_channel_id: Option<String>,
    pub verified_role_id: Option<String>,
    /// Enabled feature flags
    pub features: BTreeSet<String>,
}

/// A tenant ("guild")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub name: String,
    pub settings: TenantSettings,
    pub channels: Vec<String>,
    pub roles: Vec<String>,
    pub premium_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantRecord {
    /// Check whether premium is active at `now`
    pub fn is_premium(&self, now: DateTime<Utc>) -> bool {
        self.premium_until.map(|until| until > now).unwrap_or(false)
    }

    /// Names of the non-identity fields that differ between two tenants.
    ///
    /// Identity (`id`) and bookkeeping timestamps are not compared.
    pub fn differing_fields(&self, other: &TenantRecord) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name != other.name {
            fields.push("name");
        }
        if self.settings != other.settings {
            fields.push("settings");
        }
        if self.channels != other.channels {
            fields.push("channels");
        }
        if self.roles != other.roles {
            fields.push("roles");
        }
        if self.premium_until != other.premium_until {
            fields.push("premium_until");
        }
        fields
    }
}

/// Input for creating a tenant
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub settings: TenantSettings,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub premium_until: Option<DateTime<Utc>>,
}

impl NewTenant {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Partial tenant update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub settings: Option<TenantSettings>,
    pub channels: Option<Vec<String>>,
    pub roles: Option<Vec<String>>,
    /// `Some(None)` clears premium
    pub premium_until: Option<Option<DateTime<Utc>>>,
}

impl TenantUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.settings.is_none()
            && self.channels.is_none()
            && self.roles.is_none()
            && self.premium_until.is_none()
    }

    /// Full overwrite of every mutable field from an existing record
    pub fn replace_with(record: &TenantRecord) -> Self {
        Self {
            name: Some(record.name.clone()),
            settings: Some(record.settings.clone()),
            channels: Some(record.channels.clone()),
            roles: Some(record.roles.clone()),
            premium_until: Some(record.premium_until),
        }
    }
}

// =============================================================================
// Member
// =============================================================================

/// Per-member settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberSettings {
    pub locale: Option<String>,
    pub timezone: Option<String>,
    pub notifications: bool,
}

/// A member of a tenant, keyed by `(id, tenant_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: String,
    pub tenant_id: String,
    pub joined_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub roles: BTreeSet<String>,
    pub settings: MemberSettings,
}

/// Input for creating a member on first interaction
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMember {
    pub id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub settings: MemberSettings,
}

impl NewMember {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            ..Default::default()
        }
    }
}

/// Partial member update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberUpdate {
    pub roles: Option<BTreeSet<String>>,
    pub settings: Option<MemberSettings>,
    pub verified_at: Option<Option<DateTime<Utc>>>,
}

// =============================================================================
// Message
// =============================================================================

/// A stored message; `kind` separates ordinary messages from conversational logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageRecord {
    pub fn is_conversation(&self) -> bool {
        self.kind == MESSAGE_KIND_CONVERSATION
    }
}

/// Input for appending a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    #[serde(default = "default_message_kind")]
    pub kind: String,
}

fn default_message_kind() -> String {
    MESSAGE_KIND_DEFAULT.to_string()
}

impl NewMessage {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            content: content.into(),
            kind: default_message_kind(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }
}

/// Which messages to list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    All,
    /// Everything except conversational logs
    Ordinary,
    ConversationLogs,
}

// =============================================================================
// Connections & Economy
// =============================================================================

/// A channel bridge from one tenant to another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub target_tenant_id: String,
    pub target_channel_id: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConnection {
    pub id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub target_tenant_id: String,
    pub target_channel_id: String,
}

/// Economy balances for one member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyAccount {
    pub tenant_id: String,
    pub member_id: String,
    pub balance: i64,
    pub bank: i64,
    pub updated_at: DateTime<Utc>,
}

/// A single economy ledger row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomyTransaction {
    pub id: i64,
    pub tenant_id: String,
    pub member_id: String,
    pub amount: i64,
    pub kind: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for recording an economy transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEconomyTransaction {
    pub tenant_id: String,
    pub member_id: String,
    pub amount: i64,
    pub kind: String,
    pub description: Option<String>,
}

// =============================================================================
// Telemetry
// =============================================================================

/// A raw telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: i64,
    pub tenant_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregation window for analytics queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsPeriod {
    Day,
    Week,
    Month,
}

impl AnalyticsPeriod {
    pub fn duration(&self) -> Duration {
        match self {
            AnalyticsPeriod::Day => Duration::days(1),
            AnalyticsPeriod::Week => Duration::days(7),
            AnalyticsPeriod::Month => Duration::days(30),
        }
    }
}

impl fmt::Display for AnalyticsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsPeriod::Day => write!(f, "day"),
            AnalyticsPeriod::Week => write!(f, "week"),
            AnalyticsPeriod::Month => write!(f, "month"),
        }
    }
}

impl FromStr for AnalyticsPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(AnalyticsPeriod::Day),
            "week" => Ok(AnalyticsPeriod::Week),
            "month" => Ok(AnalyticsPeriod::Month),
            other => Err(Error::Validation(format!(
                "Invalid analytics period: {}. Use 'day', 'week', or 'month'",
                other
            ))),
        }
    }
}

/// Event count for one UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsBucket {
    pub day: NaiveDate,
    pub count: u64,
}

/// Aggregated telemetry for one tenant and event type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsReport {
    pub tenant_id: String,
    pub event_type: String,
    pub period: AnalyticsPeriod,
    pub since: DateTime<Utc>,
    pub total: u64,
    pub buckets: Vec<AnalyticsBucket>,
}

// =============================================================================
// Verification
// =============================================================================

/// Verification lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Completed,
    Failed,
    Expired,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationStatus::Pending => "pending",
            VerificationStatus::Completed => "completed",
            VerificationStatus::Failed => "failed",
            VerificationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VerificationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(VerificationStatus::Pending),
            "completed" => Ok(VerificationStatus::Completed),
            "failed" => Ok(VerificationStatus::Failed),
            "expired" => Ok(VerificationStatus::Expired),
            other => Err(Error::Validation(format!(
                "Invalid verification status: {}",
                other
            ))),
        }
    }
}

/// Verification attempt for a member, keyed by `(member_id, tenant_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub member_id: String,
    pub tenant_id: String,
    pub status: VerificationStatus,
    pub method: String,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl VerificationRecord {
    /// Pending records past `max_age` read as expired even before cleanup
    pub fn effective(mut self, now: DateTime<Utc>, max_age: Duration) -> Self {
        if self.status == VerificationStatus::Pending && now - self.created_at > max_age {
            self.status = VerificationStatus::Expired;
        }
        self
    }
}

// =============================================================================
// Backups
// =============================================================================

/// Kind of snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    #[default]
    Full,
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
        }
    }
}

impl FromStr for BackupKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(BackupKind::Full),
            other => Err(Error::Validation(format!("Unknown backup kind: {}", other))),
        }
    }
}

/// Backup metadata row; the payload lives in the blob store at `location`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    pub tenant_id: String,
    pub kind: BackupKind,
    pub location: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Tenant-scoped tables
// =============================================================================

/// Tenant-scoped row sets that backup and migration copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantTable {
    Messages,
    ConversationLogs,
    Connections,
    EconomyAccounts,
    EconomyTransactions,
}

impl TenantTable {
    pub const ALL: [TenantTable; 5] = [
        TenantTable::Messages,
        TenantTable::ConversationLogs,
        TenantTable::Connections,
        TenantTable::EconomyAccounts,
        TenantTable::EconomyTransactions,
    ];

    /// Report label (camelCase, as surfaced in migration reports)
    pub fn label(&self) -> &'static str {
        match self {
            TenantTable::Messages => "messages",
            TenantTable::ConversationLogs => "conversationLogs",
            TenantTable::Connections => "connections",
            TenantTable::EconomyAccounts => "economyAccounts",
            TenantTable::EconomyTransactions => "economyTransactions",
        }
    }
}

/// Free-form string tags attached to metrics and alerts
pub type Tags = BTreeMap<String, String>;

/// Build a tag map from literal pairs
pub fn tags<I, K, V>(pairs: I) -> Tags
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(name: &str) -> TenantRecord {
        let now = Utc::now();
        TenantRecord {
            id: "g1".into(),
            name: name.into(),
            settings: TenantSettings::default(),
            channels: vec!["c1".into()],
            roles: vec![],
            premium_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_differing_fields_ignores_identity() {
        let a = tenant("Alpha");
        let mut b = tenant("Alpha");
        b.id = "g2".into();
        b.updated_at = a.updated_at + Duration::seconds(5);
        assert!(a.differing_fields(&b).is_empty());

        b.name = "Beta".into();
        b.roles.push("admin".into());
        assert_eq!(a.differing_fields(&b), vec!["name", "roles"]);
    }

    #[test]
    fn test_period_parse() {
        assert_eq!("WEEK".parse::<AnalyticsPeriod>().unwrap(), AnalyticsPeriod::Week);
        assert_eq!(AnalyticsPeriod::Month.duration(), Duration::days(30));
        assert!("year".parse::<AnalyticsPeriod>().is_err());
    }

    #[test]
    fn test_stale_pending_reads_as_expired() {
        let now = Utc::now();
        let record = VerificationRecord {
            member_id: "u1".into(),
            tenant_id: "g1".into(),
            status: VerificationStatus::Pending,
            method: "captcha".into(),
            attempts: 1,
            created_at: now - Duration::hours(25),
            completed_at: None,
        };
        let fresh = VerificationRecord {
            created_at: now - Duration::hours(2),
            ..record.clone()
        };
        assert_eq!(
            record.effective(now, Duration::hours(24)).status,
            VerificationStatus::Expired
        );
        assert_eq!(
            fresh.effective(now, Duration::hours(24)).status,
            VerificationStatus::Pending
        );
    }

    #[test]
    fn test_new_message_default_kind() {
        let msg = NewMessage::new("m1", "g1", "c1", "u1", "hi");
        assert_eq!(msg.kind, MESSAGE_KIND_DEFAULT);
        let log = msg.with_kind(MESSAGE_KIND_CONVERSATION);
        assert_eq!(log.kind, "conversation");
    }
}

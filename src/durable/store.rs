//! Durable Store
//!
//! SQLite-backed source of truth for tenants, members, messages, telemetry,
//! verifications and the feature tables. Every write returns the record as
//! re-read from the database so callers can mirror exactly what was stored.

use crate::config::{DatabaseConfig, RetentionConfig};
use crate::domain::{
    AnalyticsBucket, ConnectionRecord, EconomyAccount, EconomyTransaction, MemberRecord,
    MemberUpdate, MessageFilter, MessageRecord, NewConnection, NewEconomyTransaction, NewMember,
    NewMessage, NewTenant, TenantRecord, TenantTable, TenantUpdate, VerificationRecord,
    VerificationStatus, MESSAGE_KIND_CONVERSATION,
};
use crate::durable::codec::{self, from_millis, now_millis, to_millis};
use crate::durable::schema;
use crate::durable::transaction::DurableTransaction;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use tracing::{debug, info, warn};

const TENANT_COLUMNS: &str =
    "id, name, settings, channels, roles, premium_until, created_at, updated_at";
const MEMBER_COLUMNS: &str = "id, tenant_id, joined_at, verified_at, roles, settings";
const MESSAGE_COLUMNS: &str =
    "id, tenant_id, channel_id, author_id, content, kind, created_at, updated_at";
const CONNECTION_COLUMNS: &str =
    "id, tenant_id, channel_id, target_tenant_id, target_channel_id, created_at";
const VERIFICATION_COLUMNS: &str =
    "member_id, tenant_id, status, method, attempts, created_at, completed_at";

/// Rows removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub telemetry_removed: u64,
    pub verifications_removed: u64,
}

/// SQLite durable store
#[derive(Clone)]
pub struct DurableStore {
    pool: Pool<Sqlite>,
    retention: RetentionConfig,
}

impl DurableStore {
    /// Connect to the configured database and create the schema
    pub async fn connect(config: &DatabaseConfig, retention: RetentionConfig) -> Result<Self> {
        let in_memory = config.url.contains(":memory:") || config.url.contains("mode=memory");
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        // An in-memory database lives exactly as long as its single connection
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .connect_with(options.busy_timeout(std::time::Duration::from_secs(5)))
                .await?
        };

        let store = Self { pool, retention };
        store.migrate().await?;

        info!(url = %config.url, in_memory, "Durable store ready");
        Ok(store)
    }

    /// Fresh in-memory store with default retention
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&DatabaseConfig::default(), RetentionConfig::default()).await
    }

    /// Create every table and index if missing
    pub async fn migrate(&self) -> Result<()> {
        for statement in schema::all_statements() {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("Durable store schema applied");
        Ok(())
    }

    /// Reachability probe
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    /// Start a multi-statement transaction
    pub async fn begin_transaction(&self) -> Result<DurableTransaction> {
        let tx = self.pool.begin().await?;
        Ok(DurableTransaction::new(tx))
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    pub async fn get_tenant(&self, id: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM tenants WHERE id = ?", TENANT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => codec::decode_tenant(&row),
            None => Ok(None),
        }
    }

    pub async fn create_tenant(&self, tenant: &NewTenant) -> Result<TenantRecord> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO tenants (id, name, settings, channels, roles, premium_until, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(serde_json::to_string(&tenant.settings)?)
        .bind(serde_json::to_string(&tenant.channels)?)
        .bind(serde_json::to_string(&tenant.roles)?)
        .bind(tenant.premium_until.map(to_millis))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let stored = self.get_tenant(&tenant.id).await?;
        written("tenants", &tenant.id, stored)
    }

    /// Apply a partial update; `None` when the tenant does not exist
    pub async fn update_tenant(
        &self,
        id: &str,
        update: &TenantUpdate,
    ) -> Result<Option<TenantRecord>> {
        let settings = update.settings.as_ref().map(serde_json::to_string).transpose()?;
        let channels = update.channels.as_ref().map(serde_json::to_string).transpose()?;
        let roles = update.roles.as_ref().map(serde_json::to_string).transpose()?;
        let (set_premium, premium) = match update.premium_until {
            Some(value) => (true, value.map(to_millis)),
            None => (false, None),
        };

        let result = sqlx::query(
            "UPDATE tenants SET \
                name = COALESCE(?, name), \
                settings = COALESCE(?, settings), \
                channels = COALESCE(?, channels), \
                roles = COALESCE(?, roles), \
                premium_until = CASE WHEN ? THEN ? ELSE premium_until END, \
                updated_at = ? \
             WHERE id = ?",
        )
        .bind(update.name.as_deref())
        .bind(settings)
        .bind(channels)
        .bind(roles)
        .bind(set_premium)
        .bind(premium)
        .bind(now_millis())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let stored = self.get_tenant(id).await?;
        written("tenants", id, stored).map(Some)
    }

    // =========================================================================
    // Members
    // =========================================================================

    pub async fn get_member(&self, id: &str, tenant_id: &str) -> Result<Option<MemberRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM members WHERE id = ? AND tenant_id = ?",
            MEMBER_COLUMNS
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => codec::decode_member(&row),
            None => Ok(None),
        }
    }

    /// Create a member on first interaction; an existing row is left as is
    pub async fn create_member(&self, member: &NewMember) -> Result<MemberRecord> {
        let now = now_millis();
        sqlx::query(
            "INSERT OR IGNORE INTO members (id, tenant_id, joined_at, verified_at, roles, settings, updated_at) \
             VALUES (?, ?, ?, NULL, ?, ?, ?)",
        )
        .bind(&member.id)
        .bind(&member.tenant_id)
        .bind(now)
        .bind(serde_json::to_string(&member.roles)?)
        .bind(serde_json::to_string(&member.settings)?)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let stored = self.get_member(&member.id, &member.tenant_id).await?;
        written("members", &member.id, stored)
    }

    pub async fn update_member(
        &self,
        id: &str,
        tenant_id: &str,
        update: &MemberUpdate,
    ) -> Result<Option<MemberRecord>> {
        let roles = update.roles.as_ref().map(serde_json::to_string).transpose()?;
        let settings = update.settings.as_ref().map(serde_json::to_string).transpose()?;
        let (set_verified, verified) = match update.verified_at {
            Some(value) => (true, value.map(to_millis)),
            None => (false, None),
        };

        let result = sqlx::query(
            "UPDATE members SET \
                roles = COALESCE(?, roles), \
                settings = COALESCE(?, settings), \
                verified_at = CASE WHEN ? THEN ? ELSE verified_at END, \
                updated_at = ? \
             WHERE id = ? AND tenant_id = ?",
        )
        .bind(roles)
        .bind(settings)
        .bind(set_verified)
        .bind(verified)
        .bind(now_millis())
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        let stored = self.get_member(id, tenant_id).await?;
        written("members", id, stored).map(Some)
    }

    /// Members of a tenant; unreadable rows are skipped
    pub async fn list_members(&self, tenant_id: &str) -> Result<Vec<MemberRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM members WHERE tenant_id = ? ORDER BY joined_at, id",
            MEMBER_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        let mut members = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(member) = codec::decode_member(row)? {
                members.push(member);
            }
        }
        Ok(members)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn get_message(&self, id: &str, tenant_id: &str) -> Result<Option<MessageRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM messages WHERE id = ? AND tenant_id = ?",
            MESSAGE_COLUMNS
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| codec::decode_message(&row)).transpose()
    }

    pub async fn create_message(&self, message: &NewMessage) -> Result<MessageRecord> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO messages (id, tenant_id, channel_id, author_id, content, kind, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.tenant_id)
        .bind(&message.channel_id)
        .bind(&message.author_id)
        .bind(&message.content)
        .bind(&message.kind)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let stored = self.get_message(&message.id, &message.tenant_id).await?;
        written("messages", &message.id, stored)
    }

    /// Edit message content; `None` when the message does not exist
    pub async fn update_message_content(
        &self,
        id: &str,
        tenant_id: &str,
        content: &str,
    ) -> Result<Option<MessageRecord>> {
        let result = sqlx::query(
            "UPDATE messages SET content = ?, updated_at = ? WHERE id = ? AND tenant_id = ?",
        )
        .bind(content)
        .bind(now_millis())
        .bind(id)
        .bind(tenant_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_message(id, tenant_id).await
    }

    pub async fn delete_message(&self, id: &str, tenant_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ? AND tenant_id = ?")
            .bind(id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_messages(
        &self,
        tenant_id: &str,
        filter: MessageFilter,
    ) -> Result<Vec<MessageRecord>> {
        let clause = match filter {
            MessageFilter::All => "",
            MessageFilter::Ordinary => " AND kind != ?",
            MessageFilter::ConversationLogs => " AND kind = ?",
        };
        let sql = format!(
            "SELECT {} FROM messages WHERE tenant_id = ?{} ORDER BY created_at, id",
            MESSAGE_COLUMNS, clause
        );

        let mut query = sqlx::query(&sql).bind(tenant_id);
        if filter != MessageFilter::All {
            query = query.bind(MESSAGE_KIND_CONVERSATION);
        }
        let rows = query.fetch_all(&self.pool).await?;

        rows.iter().map(codec::decode_message).collect()
    }

    /// Remove every message of a tenant, conversational logs included
    pub async fn delete_messages_for_tenant(&self, tenant_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE tenant_id = ?")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // =========================================================================
    // Connections
    // =========================================================================

    pub async fn create_connection(&self, connection: &NewConnection) -> Result<ConnectionRecord> {
        let now = now_millis();
        sqlx::query(
            "INSERT INTO connections (id, tenant_id, channel_id, target_tenant_id, target_channel_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&connection.id)
        .bind(&connection.tenant_id)
        .bind(&connection.channel_id)
        .bind(&connection.target_tenant_id)
        .bind(&connection.target_channel_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ConnectionRecord {
            id: connection.id.clone(),
            tenant_id: connection.tenant_id.clone(),
            channel_id: connection.channel_id.clone(),
            target_tenant_id: connection.target_tenant_id.clone(),
            target_channel_id: connection.target_channel_id.clone(),
            created_at: from_millis(now),
        })
    }

    pub async fn list_connections(&self, tenant_id: &str) -> Result<Vec<ConnectionRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM connections WHERE tenant_id = ? ORDER BY created_at, id",
            CONNECTION_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(codec::decode_connection).collect()
    }

    // =========================================================================
    // Economy
    // =========================================================================

    pub async fn get_economy_account(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Option<EconomyAccount>> {
        let row = sqlx::query(
            "SELECT tenant_id, member_id, balance, bank, updated_at FROM economy_accounts \
             WHERE tenant_id = ? AND member_id = ?",
        )
        .bind(tenant_id)
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| codec::decode_economy_account(&row)).transpose()
    }

    /// Set absolute balances, creating the account if needed
    pub async fn upsert_economy_account(
        &self,
        tenant_id: &str,
        member_id: &str,
        balance: i64,
        bank: i64,
    ) -> Result<EconomyAccount> {
        sqlx::query(
            "INSERT INTO economy_accounts (tenant_id, member_id, balance, bank, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (tenant_id, member_id) DO UPDATE SET \
                balance = excluded.balance, bank = excluded.bank, updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(balance)
        .bind(bank)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let stored = self.get_economy_account(tenant_id, member_id).await?;
        written("economy_accounts", member_id, stored)
    }

    /// Increment the wallet balance by `delta`, creating the account at zero if needed
    pub async fn adjust_balance(
        &self,
        tenant_id: &str,
        member_id: &str,
        delta: i64,
    ) -> Result<EconomyAccount> {
        sqlx::query(
            "INSERT INTO economy_accounts (tenant_id, member_id, balance, bank, updated_at) \
             VALUES (?, ?, ?, 0, ?) \
             ON CONFLICT (tenant_id, member_id) DO UPDATE SET \
                balance = balance + excluded.balance, updated_at = excluded.updated_at",
        )
        .bind(tenant_id)
        .bind(member_id)
        .bind(delta)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let stored = self.get_economy_account(tenant_id, member_id).await?;
        written("economy_accounts", member_id, stored)
    }

    pub async fn list_economy_accounts(&self, tenant_id: &str) -> Result<Vec<EconomyAccount>> {
        let rows = sqlx::query(
            "SELECT tenant_id, member_id, balance, bank, updated_at FROM economy_accounts \
             WHERE tenant_id = ? ORDER BY member_id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(codec::decode_economy_account).collect()
    }

    pub async fn record_economy_transaction(
        &self,
        transaction: &NewEconomyTransaction,
    ) -> Result<EconomyTransaction> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO economy_transactions (tenant_id, member_id, amount, kind, description, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&transaction.tenant_id)
        .bind(&transaction.member_id)
        .bind(transaction.amount)
        .bind(&transaction.kind)
        .bind(transaction.description.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(EconomyTransaction {
            id: result.last_insert_rowid(),
            tenant_id: transaction.tenant_id.clone(),
            member_id: transaction.member_id.clone(),
            amount: transaction.amount,
            kind: transaction.kind.clone(),
            description: transaction.description.clone(),
            created_at: from_millis(now),
        })
    }

    pub async fn list_economy_transactions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<EconomyTransaction>> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, member_id, amount, kind, description, created_at \
             FROM economy_transactions WHERE tenant_id = ? ORDER BY id",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(codec::decode_economy_transaction).collect()
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    /// Append a telemetry event and return its id
    pub async fn insert_telemetry(
        &self,
        tenant_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO telemetry (tenant_id, event_type, payload, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(event_type)
        .bind(serde_json::to_string(payload)?)
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Per-UTC-day event counts since `since`, ascending by day
    pub async fn telemetry_buckets(
        &self,
        tenant_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<AnalyticsBucket>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT date(created_at / 1000, 'unixepoch') AS day, COUNT(*) AS count \
             FROM telemetry \
             WHERE tenant_id = ? AND event_type = ? AND created_at >= ? \
             GROUP BY day ORDER BY day",
        )
        .bind(tenant_id)
        .bind(event_type)
        .bind(to_millis(since))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(day, count)| {
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d").map_err(|e| {
                    Error::InvalidRecord {
                        table: "telemetry".into(),
                        reason: format!("bad day bucket {}: {}", day, e),
                    }
                })?;
                Ok(AnalyticsBucket {
                    day,
                    count: count.max(0) as u64,
                })
            })
            .collect()
    }

    // =========================================================================
    // Verifications
    // =========================================================================

    /// Start (or restart) a verification; each call counts one attempt
    pub async fn upsert_verification(
        &self,
        member_id: &str,
        tenant_id: &str,
        method: &str,
    ) -> Result<VerificationRecord> {
        sqlx::query(
            "INSERT INTO verifications (member_id, tenant_id, status, method, attempts, created_at, completed_at) \
             VALUES (?, ?, 'pending', ?, 1, ?, NULL) \
             ON CONFLICT (member_id, tenant_id) DO UPDATE SET \
                status = 'pending', \
                method = excluded.method, \
                attempts = verifications.attempts + 1, \
                created_at = excluded.created_at, \
                completed_at = NULL",
        )
        .bind(member_id)
        .bind(tenant_id)
        .bind(method)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        let stored = self.get_verification(member_id, tenant_id).await?;
        written("verifications", member_id, stored)
    }

    /// Move a verification to a new status; `None` when no verification exists.
    ///
    /// A pending verification past its window can only be marked expired;
    /// any other transition fails validation until it is restarted.
    pub async fn set_verification_status(
        &self,
        member_id: &str,
        tenant_id: &str,
        status: VerificationStatus,
    ) -> Result<Option<VerificationRecord>> {
        let now = Utc::now();
        let cutoff = now - Duration::hours(i64::from(self.retention.pending_verification_hours));
        let completed_at = (status == VerificationStatus::Completed).then(|| to_millis(now));
        let result = sqlx::query(
            "UPDATE verifications SET status = ?, completed_at = ? \
             WHERE member_id = ? AND tenant_id = ? \
               AND (? OR NOT (status = 'pending' AND created_at < ?))",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(member_id)
        .bind(tenant_id)
        .bind(status == VerificationStatus::Expired)
        .bind(to_millis(cutoff))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_verification(member_id, tenant_id).await? {
                Some(_) => Err(Error::Validation(format!(
                    "verification for {} in {} has expired",
                    member_id, tenant_id
                ))),
                None => Ok(None),
            };
        }
        self.get_verification(member_id, tenant_id).await
    }

    /// Current verification; stale pending rows read as expired
    pub async fn get_verification(
        &self,
        member_id: &str,
        tenant_id: &str,
    ) -> Result<Option<VerificationRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM verifications WHERE member_id = ? AND tenant_id = ?",
            VERIFICATION_COLUMNS
        ))
        .bind(member_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let max_age = Duration::hours(i64::from(self.retention.pending_verification_hours));
        Ok(codec::decode_verification(&row)?.map(|record| record.effective(Utc::now(), max_age)))
    }

    // =========================================================================
    // Parity & Retention
    // =========================================================================

    /// Row count of one tenant-scoped table
    pub async fn count_for_tenant(&self, tenant_id: &str, table: TenantTable) -> Result<u64> {
        let sql = match table {
            TenantTable::Messages => {
                "SELECT COUNT(*) FROM messages WHERE tenant_id = ? AND kind != ?"
            }
            TenantTable::ConversationLogs => {
                "SELECT COUNT(*) FROM messages WHERE tenant_id = ? AND kind = ?"
            }
            TenantTable::Connections => "SELECT COUNT(*) FROM connections WHERE tenant_id = ?",
            TenantTable::EconomyAccounts => {
                "SELECT COUNT(*) FROM economy_accounts WHERE tenant_id = ?"
            }
            TenantTable::EconomyTransactions => {
                "SELECT COUNT(*) FROM economy_transactions WHERE tenant_id = ?"
            }
        };

        let mut query = sqlx::query_scalar::<_, i64>(sql).bind(tenant_id);
        if matches!(table, TenantTable::Messages | TenantTable::ConversationLogs) {
            query = query.bind(MESSAGE_KIND_CONVERSATION);
        }
        let count = query.fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    /// Purge expired telemetry and stale pending verifications
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        self.cleanup_at(Utc::now()).await
    }

    /// Retention pass evaluated against an explicit clock
    pub async fn cleanup_at(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let telemetry_cutoff = now - Duration::days(i64::from(self.retention.telemetry_days));
        let verification_cutoff =
            now - Duration::hours(i64::from(self.retention.pending_verification_hours));

        let telemetry = sqlx::query("DELETE FROM telemetry WHERE created_at < ?")
            .bind(to_millis(telemetry_cutoff))
            .execute(&self.pool)
            .await?;
        let verifications =
            sqlx::query("DELETE FROM verifications WHERE status = 'pending' AND created_at < ?")
                .bind(to_millis(verification_cutoff))
                .execute(&self.pool)
                .await?;

        let report = CleanupReport {
            telemetry_removed: telemetry.rows_affected(),
            verifications_removed: verifications.rows_affected(),
        };
        info!(
            telemetry_removed = report.telemetry_removed,
            verifications_removed = report.verifications_removed,
            "Retention cleanup complete"
        );
        Ok(report)
    }
}

/// Unwrap a just-written record, which must read back
fn written<T>(table: &str, key: &str, stored: Option<T>) -> Result<T> {
    stored.ok_or_else(|| {
        warn!(table, key, "Record not readable after write");
        Error::InvalidRecord {
            table: table.to_string(),
            reason: format!("{} not readable after write", key),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemberSettings, TenantSettings, MESSAGE_KIND_CONVERSATION};
    use assert_matches::assert_matches;

    async fn store() -> DurableStore {
        DurableStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_tenant_create_and_partial_update() {
        let store = store().await;
        let mut new = NewTenant::new("g1", "Guild One");
        new.channels = vec!["c1".into()];
        let created = store.create_tenant(&new).await.unwrap();
        assert_eq!(created.name, "Guild One");
        assert_eq!(created.channels, vec!["c1".to_string()]);

        let update = TenantUpdate {
            settings: Some(TenantSettings {
                prefix: Some("!".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let updated = store.update_tenant("g1", &update).await.unwrap().unwrap();
        assert_eq!(updated.name, "Guild One");
        assert_eq!(updated.settings.prefix.as_deref(), Some("!"));
        assert_eq!(updated.channels, vec!["c1".to_string()]);

        let missing = store.update_tenant("nope", &update).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_premium_can_be_cleared() {
        let store = store().await;
        let mut new = NewTenant::new("g1", "Guild");
        new.premium_until = Some(from_millis(now_millis() + 86_400_000));
        let created = store.create_tenant(&new).await.unwrap();
        assert!(created.is_premium(Utc::now()));

        let update = TenantUpdate {
            premium_until: Some(None),
            ..Default::default()
        };
        let updated = store.update_tenant("g1", &update).await.unwrap().unwrap();
        assert_eq!(updated.premium_until, None);
    }

    #[tokio::test]
    async fn test_unparseable_json_is_skipped() {
        let store = store().await;
        store.create_tenant(&NewTenant::new("g1", "Guild")).await.unwrap();
        sqlx::query("UPDATE tenants SET settings = '{not json' WHERE id = 'g1'")
            .execute(store.pool())
            .await
            .unwrap();

        assert!(store.get_tenant("g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_member_create_is_idempotent() {
        let store = store().await;
        let mut member = NewMember::new("u1", "g1");
        member.settings = MemberSettings {
            notifications: true,
            ..Default::default()
        };
        let first = store.create_member(&member).await.unwrap();

        member.settings.notifications = false;
        let second = store.create_member(&member).await.unwrap();
        assert_eq!(first, second);
        assert!(second.settings.notifications);
        assert_eq!(store.list_members("g1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_message_filters_and_counts() {
        let store = store().await;
        store
            .create_message(&NewMessage::new("m1", "g1", "c1", "u1", "hello"))
            .await
            .unwrap();
        store
            .create_message(
                &NewMessage::new("m2", "g1", "c1", "u1", "log").with_kind(MESSAGE_KIND_CONVERSATION),
            )
            .await
            .unwrap();

        assert_eq!(store.list_messages("g1", MessageFilter::All).await.unwrap().len(), 2);
        let logs = store
            .list_messages("g1", MessageFilter::ConversationLogs)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, "m2");
        assert_eq!(store.count_for_tenant("g1", TenantTable::Messages).await.unwrap(), 1);
        assert_eq!(
            store.count_for_tenant("g1", TenantTable::ConversationLogs).await.unwrap(),
            1
        );

        let edited = store.update_message_content("m1", "g1", "edited").await.unwrap();
        assert_eq!(edited.unwrap().content, "edited");
        assert!(store.delete_message("m1", "g1").await.unwrap());
        assert!(!store.delete_message("m1", "g1").await.unwrap());
        assert_eq!(store.delete_messages_for_tenant("g1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_message_is_database_error() {
        let store = store().await;
        let msg = NewMessage::new("m1", "g1", "c1", "u1", "hello");
        store.create_message(&msg).await.unwrap();
        let err = store.create_message(&msg).await.unwrap_err();
        assert_matches!(err, Error::Database(_));

        // Same id under another tenant is a different row
        let other = NewMessage::new("m1", "g2", "c1", "u1", "hello");
        assert!(store.create_message(&other).await.is_ok());
    }

    #[tokio::test]
    async fn test_adjust_balance_increments() {
        let store = store().await;
        store.adjust_balance("g1", "u1", 50).await.unwrap();
        let account = store.adjust_balance("g1", "u1", -20).await.unwrap();
        assert_eq!(account.balance, 30);
        assert_eq!(account.bank, 0);

        let account = store.upsert_economy_account("g1", "u1", 5, 100).await.unwrap();
        assert_eq!((account.balance, account.bank), (5, 100));
    }

    #[tokio::test]
    async fn test_verification_lifecycle() {
        let store = store().await;
        let first = store.upsert_verification("u1", "g1", "captcha").await.unwrap();
        assert_eq!(first.status, VerificationStatus::Pending);
        assert_eq!(first.attempts, 1);

        let retry = store.upsert_verification("u1", "g1", "captcha").await.unwrap();
        assert_eq!(retry.attempts, 2);

        let done = store
            .set_verification_status("u1", "g1", VerificationStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, VerificationStatus::Completed);
        assert!(done.completed_at.is_some());

        let missing = store
            .set_verification_status("u2", "g1", VerificationStatus::Failed)
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_stale_pending_verification_reads_expired_then_purged() {
        let store = store().await;
        store.upsert_verification("u1", "g1", "captcha").await.unwrap();
        let stale = to_millis(Utc::now() - Duration::hours(25));
        sqlx::query("UPDATE verifications SET created_at = ?")
            .bind(stale)
            .execute(store.pool())
            .await
            .unwrap();

        let record = store.get_verification("u1", "g1").await.unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Expired);

        let report = store.cleanup().await.unwrap();
        assert_eq!(report.verifications_removed, 1);
        assert!(store.get_verification("u1", "g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_verification_cannot_complete() {
        let store = store().await;
        store.upsert_verification("u1", "g1", "captcha").await.unwrap();
        let stale = to_millis(Utc::now() - Duration::hours(25));
        sqlx::query("UPDATE verifications SET created_at = ?")
            .bind(stale)
            .execute(store.pool())
            .await
            .unwrap();

        assert_matches!(
            store
                .set_verification_status("u1", "g1", VerificationStatus::Completed)
                .await,
            Err(Error::Validation(_))
        );
        let record = store.get_verification("u1", "g1").await.unwrap().unwrap();
        assert_eq!(record.status, VerificationStatus::Expired);
        assert!(record.completed_at.is_none());

        // Marking it expired is still allowed and persists the status
        let expired = store
            .set_verification_status("u1", "g1", VerificationStatus::Expired)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expired.status, VerificationStatus::Expired);

        // A restart opens a fresh window
        store.upsert_verification("u1", "g1", "captcha").await.unwrap();
        let done = store
            .set_verification_status("u1", "g1", VerificationStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, VerificationStatus::Completed);
    }

    #[tokio::test]
    async fn test_telemetry_retention_boundary() {
        let store = store().await;
        let now = Utc::now();
        let payload = serde_json::json!({ "command": "ping" });
        store
            .insert_telemetry("g1", "command", &payload, now - Duration::days(31))
            .await
            .unwrap();
        store
            .insert_telemetry("g1", "command", &payload, now - Duration::days(29))
            .await
            .unwrap();

        let report = store.cleanup_at(now).await.unwrap();
        assert_eq!(report.telemetry_removed, 1);

        let buckets = store
            .telemetry_buckets("g1", "command", now - Duration::days(60))
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[0].day, (now - Duration::days(29)).date_naive());
    }

    #[tokio::test]
    async fn test_telemetry_buckets_group_by_day() {
        let store = store().await;
        let now = Utc::now();
        let payload = serde_json::json!({});
        for offset in [0, 0, 2] {
            store
                .insert_telemetry("g1", "join", &payload, now - Duration::days(offset))
                .await
                .unwrap();
        }
        store
            .insert_telemetry("g1", "leave", &payload, now)
            .await
            .unwrap();

        let buckets = store
            .telemetry_buckets("g1", "join", now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(buckets.len(), 2);
        assert!(buckets[0].day < buckets[1].day);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<u64>(), 3);
    }
}

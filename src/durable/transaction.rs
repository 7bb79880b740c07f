//! Durable transactions
//!
//! A `DurableTransaction` owns one pooled connection for its whole life.
//! Dropping it without `commit()` rolls every statement back.

use crate::domain::{ConnectionRecord, EconomyAccount, EconomyTransaction, MessageRecord, TenantRecord};
use crate::durable::codec::to_millis;
use crate::error::Result;
use sqlx::{Sqlite, Transaction};
use tracing::debug;

/// Rows removed by [`DurableTransaction::clear_tenant_rows`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedRows {
    pub messages: u64,
    pub connections: u64,
    pub economy_accounts: u64,
    pub economy_transactions: u64,
}

impl ClearedRows {
    pub fn total(&self) -> u64 {
        self.messages + self.connections + self.economy_accounts + self.economy_transactions
    }
}

/// Multi-statement atomic scope over the durable store
pub struct DurableTransaction {
    tx: Transaction<'static, Sqlite>,
    statements: usize,
}

impl DurableTransaction {
    pub(crate) fn new(tx: Transaction<'static, Sqlite>) -> Self {
        Self { tx, statements: 0 }
    }

    /// Statements executed so far
    pub fn statements(&self) -> usize {
        self.statements
    }

    /// Insert or fully overwrite a tenant record, keeping the stored timestamps given
    pub async fn upsert_tenant(&mut self, tenant: &TenantRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO tenants (id, name, settings, channels, roles, premium_until, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET \
                name = excluded.name, \
                settings = excluded.settings, \
                channels = excluded.channels, \
                roles = excluded.roles, \
                premium_until = excluded.premium_until, \
                updated_at = excluded.updated_at",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(serde_json::to_string(&tenant.settings)?)
        .bind(serde_json::to_string(&tenant.channels)?)
        .bind(serde_json::to_string(&tenant.roles)?)
        .bind(tenant.premium_until.map(to_millis))
        .bind(to_millis(tenant.created_at))
        .bind(to_millis(tenant.updated_at))
        .execute(&mut *self.tx)
        .await?;

        self.statements += 1;
        Ok(())
    }

    /// Delete the tenant's rows from every restorable table
    pub async fn clear_tenant_rows(&mut self, tenant_id: &str) -> Result<ClearedRows> {
        let mut cleared = ClearedRows::default();
        for (table, slot) in [
            ("messages", &mut cleared.messages),
            ("connections", &mut cleared.connections),
            ("economy_accounts", &mut cleared.economy_accounts),
            ("economy_transactions", &mut cleared.economy_transactions),
        ] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE tenant_id = ?", table))
                .bind(tenant_id)
                .execute(&mut *self.tx)
                .await?;
            *slot = result.rows_affected();
            self.statements += 1;
        }

        debug!(tenant_id, rows = cleared.total(), "Cleared tenant rows in transaction");
        Ok(cleared)
    }

    /// Insert a message exactly as given, conversational logs included
    pub async fn insert_message(&mut self, message: &MessageRecord) -> Result<()> {
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
        .bind(to_millis(message.created_at))
        .bind(to_millis(message.updated_at))
        .execute(&mut *self.tx)
        .await?;

        self.statements += 1;
        Ok(())
    }

    pub async fn insert_connection(&mut self, connection: &ConnectionRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO connections (id, tenant_id, channel_id, target_tenant_id, target_channel_id, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&connection.id)
        .bind(&connection.tenant_id)
        .bind(&connection.channel_id)
        .bind(&connection.target_tenant_id)
        .bind(&connection.target_channel_id)
        .bind(to_millis(connection.created_at))
        .execute(&mut *self.tx)
        .await?;

        self.statements += 1;
        Ok(())
    }

    pub async fn insert_economy_account(&mut self, account: &EconomyAccount) -> Result<()> {
        sqlx::query(
            "INSERT INTO economy_accounts (tenant_id, member_id, balance, bank, updated_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&account.tenant_id)
        .bind(&account.member_id)
        .bind(account.balance)
        .bind(account.bank)
        .bind(to_millis(account.updated_at))
        .execute(&mut *self.tx)
        .await?;

        self.statements += 1;
        Ok(())
    }

    /// Insert a ledger row under a fresh id; returns the new id
    pub async fn insert_economy_transaction(
        &mut self,
        transaction: &EconomyTransaction,
    ) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO economy_transactions (tenant_id, member_id, amount, kind, description, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&transaction.tenant_id)
        .bind(&transaction.member_id)
        .bind(transaction.amount)
        .bind(&transaction.kind)
        .bind(transaction.description.as_deref())
        .bind(to_millis(transaction.created_at))
        .execute(&mut *self.tx)
        .await?;

        self.statements += 1;
        Ok(result.last_insert_rowid())
    }

    pub async fn commit(self) -> Result<()> {
        let statements = self.statements;
        self.tx.commit().await?;
        debug!(statements, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let statements = self.statements;
        self.tx.rollback().await?;
        debug!(statements, "Transaction rolled back");
        Ok(())
    }
}

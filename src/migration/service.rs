//! Migration Service
//!
//! Copies a tenant's data set to a new tenant id in one durable transaction
//! and verifies parity afterwards.

use crate::domain::{
    ConnectionRecord, EconomyAccount, EconomyTransaction, MessageFilter, MessageRecord,
    TenantRecord, TenantTable,
};
use crate::durable::codec::{from_millis, now_millis};
use crate::durable::DurableTransaction;
use crate::error::{Error, Result};
use crate::manager::StorageManager;
use crate::migration::report::{CategoryCheck, MigrationReport, MigrationSummary, TenantCheck};
use tracing::{error, info, warn};

/// Everything copied for one tenant, read before the transaction opens
struct TenantDataSet {
    tenant: TenantRecord,
    messages: Vec<MessageRecord>,
    conversation_logs: Vec<MessageRecord>,
    connections: Vec<ConnectionRecord>,
    accounts: Vec<EconomyAccount>,
    transactions: Vec<EconomyTransaction>,
}

impl TenantDataSet {
    /// Rewrite every tenant reference to `new_id`
    fn retarget(mut self, new_id: &str) -> Self {
        let now = from_millis(now_millis());
        self.tenant.id = new_id.to_string();
        self.tenant.created_at = now;
        self.tenant.updated_at = now;
        for message in self.messages.iter_mut().chain(self.conversation_logs.iter_mut()) {
            message.tenant_id = new_id.to_string();
        }
        for connection in &mut self.connections {
            connection.tenant_id = new_id.to_string();
        }
        for account in &mut self.accounts {
            account.tenant_id = new_id.to_string();
        }
        for transaction in &mut self.transactions {
            transaction.tenant_id = new_id.to_string();
        }
        self
    }
}

/// Tenant-to-tenant copy and parity verification
#[derive(Clone)]
pub struct MigrationService {
    manager: StorageManager,
}

impl MigrationService {
    pub fn new(manager: StorageManager) -> Self {
        Self { manager }
    }

    /// Copy the tenant record and all tenant-scoped rows from `old_id` to `new_id`.
    ///
    /// All-or-nothing: a failed insert (e.g. rows already present under
    /// `new_id`) rolls the whole copy back.
    pub async fn migrate_guild_data(&self, old_id: &str, new_id: &str) -> Result<MigrationSummary> {
        if old_id == new_id {
            return Err(Error::Validation(format!(
                "source and destination tenant are both {}",
                old_id
            )));
        }

        let data = self.load(old_id).await?.retarget(new_id);

        let mut tx = self.manager.begin_transaction().await?;
        let summary = match copy(&mut tx, &data, old_id, new_id).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(old_id, new_id, error = %e, "Migration failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(old_id, new_id, error = %rollback, "Rollback failed; connection will discard the transaction");
                }
                return Err(Error::MigrationFailed {
                    from: old_id.to_string(),
                    to: new_id.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        tx.commit().await?;

        self.manager.invalidate_tenant(new_id).await;
        info!(
            old_id,
            new_id,
            rows = summary.total(),
            "Tenant data migrated"
        );
        Ok(summary)
    }

    /// Compare both tenants straight from the durable store. Read-only.
    pub async fn verify_migration(&self, old_id: &str, new_id: &str) -> Result<MigrationReport> {
        let durable = self.manager.durable();
        let old_tenant = durable.get_tenant(old_id).await?;
        let new_tenant = durable.get_tenant(new_id).await?;

        let mismatched_fields = match (&old_tenant, &new_tenant) {
            (Some(old), Some(new)) => old
                .differing_fields(new)
                .into_iter()
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        };
        let tenant = TenantCheck {
            old_exists: old_tenant.is_some(),
            new_exists: new_tenant.is_some(),
            mismatched_fields,
        };

        let mut report = MigrationReport::new(old_id, new_id, tenant);
        for table in TenantTable::ALL {
            let old_count = durable.count_for_tenant(old_id, table).await?;
            let new_count = durable.count_for_tenant(new_id, table).await?;
            report.set_category(table, CategoryCheck::new(old_count, new_count));
        }
        let report = report.finish();

        if report.passed {
            info!(old_id, new_id, "Migration verified");
        } else {
            warn!(
                old_id,
                new_id,
                categories = ?report.mismatched_categories(),
                fields = ?report.tenant.mismatched_fields,
                "Migration verification found differences"
            );
        }
        Ok(report)
    }

    async fn load(&self, tenant_id: &str) -> Result<TenantDataSet> {
        Ok(TenantDataSet {
            tenant: self.manager.require_tenant(tenant_id).await?,
            messages: self
                .manager
                .list_messages(tenant_id, MessageFilter::Ordinary)
                .await?,
            conversation_logs: self
                .manager
                .list_messages(tenant_id, MessageFilter::ConversationLogs)
                .await?,
            connections: self.manager.list_connections(tenant_id).await?,
            accounts: self.manager.list_economy_accounts(tenant_id).await?,
            transactions: self.manager.list_economy_transactions(tenant_id).await?,
        })
    }
}

async fn copy(
    tx: &mut DurableTransaction,
    data: &TenantDataSet,
    old_id: &str,
    new_id: &str,
) -> Result<MigrationSummary> {
    tx.upsert_tenant(&data.tenant).await?;
    for message in &data.messages {
        tx.insert_message(message).await?;
    }
    for connection in &data.connections {
        tx.insert_connection(connection).await?;
    }
    for account in &data.accounts {
        tx.insert_economy_account(account).await?;
    }
    for transaction in &data.transactions {
        tx.insert_economy_transaction(transaction).await?;
    }
    for log in &data.conversation_logs {
        tx.insert_message(log).await?;
    }

    Ok(MigrationSummary {
        old_tenant_id: old_id.to_string(),
        new_tenant_id: new_id.to_string(),
        messages: data.messages.len(),
        conversation_logs: data.conversation_logs.len(),
        connections: data.connections.len(),
        economy_accounts: data.accounts.len(),
        economy_transactions: data.transactions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        NewConnection, NewEconomyTransaction, NewMessage, NewTenant, TenantUpdate,
        MESSAGE_KIND_CONVERSATION,
    };
    use crate::testing;
    use assert_matches::assert_matches;

    async fn seeded() -> (StorageManager, MigrationService) {
        let manager = testing::manager().await;
        let mut tenant = NewTenant::new("old", "Old Guild");
        tenant.roles = vec!["admin".into()];
        manager.create_tenant(&tenant).await.unwrap();

        for (id, content) in [("m1", "hello"), ("m2", "world")] {
            manager
                .create_message(&NewMessage::new(id, "old", "c1", "u1", content))
                .await
                .unwrap();
        }
        manager
            .create_message(
                &NewMessage::new("l1", "old", "c1", "bot", "log").with_kind(MESSAGE_KIND_CONVERSATION),
            )
            .await
            .unwrap();
        manager
            .create_connection(&NewConnection {
                id: "x1".into(),
                tenant_id: "old".into(),
                channel_id: "c1".into(),
                target_tenant_id: "other".into(),
                target_channel_id: "c2".into(),
            })
            .await
            .unwrap();
        manager.adjust_balance("old", "u1", 50).await.unwrap();
        manager.adjust_balance("old", "u2", 75).await.unwrap();
        manager
            .record_economy_transaction(&NewEconomyTransaction {
                tenant_id: "old".into(),
                member_id: "u1".into(),
                amount: 50,
                kind: "work".into(),
                description: Some("shift".into()),
            })
            .await
            .unwrap();

        let service = MigrationService::new(manager.clone());
        (manager, service)
    }

    #[tokio::test]
    async fn test_migration_reaches_parity() {
        let (manager, service) = seeded().await;

        let summary = service.migrate_guild_data("old", "new").await.unwrap();
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.conversation_logs, 1);
        assert_eq!(summary.economy_accounts, 2);
        assert_eq!(summary.total(), 7);

        let report = service.verify_migration("old", "new").await.unwrap();
        assert!(report.passed, "{:?}", report);
        for table in TenantTable::ALL {
            assert!(report.category(table).count_match);
        }
        assert_eq!(report.messages.new_count, 2);

        let copied = manager.get_message("m1", "new").await.unwrap().unwrap();
        assert_eq!(copied.content, "hello");
        let tenant = manager.get_tenant("new").await.unwrap().unwrap();
        assert_eq!(tenant.name, "Old Guild");
        assert_eq!(tenant.roles, vec!["admin".to_string()]);

        // Source is left untouched
        assert!(manager.get_message("m1", "old").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_source_tenant() {
        let (_manager, service) = seeded().await;
        assert_matches!(
            service.migrate_guild_data("ghost", "new").await,
            Err(Error::TenantNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_same_tenant_rejected() {
        let (_manager, service) = seeded().await;
        assert_matches!(
            service.migrate_guild_data("old", "old").await,
            Err(Error::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_conflicting_destination_rolls_back() {
        let (manager, service) = seeded().await;
        manager
            .create_message(&NewMessage::new("m2", "new", "c9", "u9", "already here"))
            .await
            .unwrap();

        let err = service.migrate_guild_data("old", "new").await.unwrap_err();
        assert_matches!(err, Error::MigrationFailed { .. });

        assert!(manager.durable().get_tenant("new").await.unwrap().is_none());
        assert_eq!(manager.count_rows("new", TenantTable::Messages).await.unwrap(), 1);
        assert_eq!(
            manager.count_rows("new", TenantTable::Connections).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_verify_reports_divergence() {
        let (manager, service) = seeded().await;
        service.migrate_guild_data("old", "new").await.unwrap();

        manager.delete_message("m1", "new").await.unwrap();
        manager
            .update_tenant(
                "new",
                &TenantUpdate {
                    name: Some("Renamed".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let report = service.verify_migration("old", "new").await.unwrap();
        assert!(!report.passed);
        assert!(!report.messages.count_match);
        assert!(report.connections.count_match);
        assert_eq!(report.tenant.mismatched_fields, vec!["name".to_string()]);

        // Read-only: running again yields the same verdict
        let again = service.verify_migration("old", "new").await.unwrap();
        assert_eq!(again.messages, report.messages);
    }

    #[tokio::test]
    async fn test_verify_without_destination() {
        let (_manager, service) = seeded().await;
        let report = service.verify_migration("old", "never").await.unwrap();
        assert!(!report.passed);
        assert!(report.tenant.old_exists);
        assert!(!report.tenant.new_exists);
        assert_eq!(report.messages.new_count, 0);
    }
}

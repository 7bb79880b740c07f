//! Backup Service
//!
//! Exports a tenant into one blob and restores it all-or-nothing inside a
//! single durable transaction.

use crate::backup::document::{BackupDocument, EconomySection, BACKUP_FORMAT_VERSION};
use crate::blob::BlobKey;
use crate::domain::{BackupKind, BackupSnapshot, MessageFilter};
use crate::durable::{codec::from_millis, codec::now_millis, DurableTransaction};
use crate::error::{Error, Result};
use crate::manager::StorageManager;
use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

/// Blob kind segment under which snapshots live
pub const BACKUP_BLOB_KIND: &str = "backups";

/// Rows written by a restore, per section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreSummary {
    pub tenant_id: String,
    pub location: String,
    pub messages: usize,
    pub conversation_logs: usize,
    pub connections: usize,
    pub economy_accounts: usize,
    pub economy_transactions: usize,
}

/// Snapshot creation, restore and retention
#[derive(Clone)]
pub struct BackupService {
    manager: StorageManager,
}

impl BackupService {
    pub fn new(manager: StorageManager) -> Self {
        Self { manager }
    }

    /// Export a tenant to the blob store and record its metadata
    pub async fn create_backup(&self, tenant_id: &str) -> Result<BackupSnapshot> {
        let tenant = self.manager.require_tenant(tenant_id).await?;
        let messages = self
            .manager
            .list_messages(tenant_id, MessageFilter::Ordinary)
            .await?;
        let conversation_logs = self
            .manager
            .list_messages(tenant_id, MessageFilter::ConversationLogs)
            .await?;
        let connections = self.manager.list_connections(tenant_id).await?;
        let accounts = self.manager.list_economy_accounts(tenant_id).await?;
        let transactions = self.manager.list_economy_transactions(tenant_id).await?;

        let created_at = from_millis(now_millis());
        let document = BackupDocument {
            version: BACKUP_FORMAT_VERSION,
            tenant_id: tenant_id.to_string(),
            created_at,
            tenant,
            messages,
            connections,
            economy: EconomySection {
                accounts,
                transactions,
            },
            conversation_logs,
        };

        let key = BlobKey::new(
            BACKUP_BLOB_KIND,
            tenant_id,
            format!("{}.json", created_at.timestamp_millis()),
        )?;
        let meta = self.manager.put_json(&key, &document).await?;

        let snapshot = BackupSnapshot {
            tenant_id: tenant_id.to_string(),
            kind: BackupKind::Full,
            location: key.to_string(),
            size_bytes: meta.size_bytes,
            created_at,
        };
        if let Err(e) = self.manager.record_backup(&snapshot).await {
            // Metadata is the index; an unindexed blob would never be pruned
            if let Err(cleanup) = self.manager.delete_blob(&key).await {
                warn!(key = %key, error = %cleanup, "Failed to remove unrecorded backup blob");
            }
            return Err(e);
        }

        info!(
            tenant_id,
            location = %snapshot.location,
            rows = document.row_count(),
            size_bytes = snapshot.size_bytes,
            "Backup created"
        );
        Ok(snapshot)
    }

    /// Download and validate a snapshot without applying it
    pub async fn read_backup(&self, location: &str) -> Result<BackupDocument> {
        let key: BlobKey = location.parse()?;
        let raw: serde_json::Value = self.manager.get_json(&key).await.map_err(|e| match e {
            Error::Json(json) => Error::CorruptBackup {
                key: location.to_string(),
                reason: json.to_string(),
            },
            other => other,
        })?;
        BackupDocument::from_value(location, raw)
    }

    /// Replace the tenant's rows with the snapshot contents.
    ///
    /// Runs in one transaction: either every section is applied or none is.
    pub async fn restore_backup(&self, tenant_id: &str, location: &str) -> Result<RestoreSummary> {
        let document = self.read_backup(location).await?;
        if document.tenant_id != tenant_id {
            return Err(Error::Validation(format!(
                "backup {} belongs to tenant {}, not {}",
                location, document.tenant_id, tenant_id
            )));
        }

        let mut tx = self.manager.begin_transaction().await?;
        let mut summary = match replay(&mut tx, &document).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(tenant_id, location, error = %e, "Restore failed, rolling back");
                if let Err(rollback) = tx.rollback().await {
                    warn!(tenant_id, error = %rollback, "Rollback failed; connection will discard the transaction");
                }
                return Err(e);
            }
        };
        tx.commit().await?;

        self.manager.invalidate_tenant(tenant_id).await;
        summary.location = location.to_string();

        info!(
            tenant_id,
            location,
            messages = summary.messages,
            connections = summary.connections,
            "Backup restored"
        );
        Ok(summary)
    }

    /// Snapshots of a tenant, newest first
    pub async fn list_backups(&self, tenant_id: &str) -> Result<Vec<BackupSnapshot>> {
        self.manager.list_backups(tenant_id).await
    }

    pub async fn get_backup(&self, location: &str) -> Result<Option<BackupSnapshot>> {
        self.manager.get_backup(location).await
    }

    /// Delete blob and metadata of every backup older than the retention window.
    ///
    /// A backup whose blob cannot be deleted keeps its metadata so a later
    /// run can retry it.
    pub async fn cleanup_old_backups(&self, tenant_id: &str, retention_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let expired = self.manager.list_backups_before(tenant_id, cutoff).await?;

        let mut removed = 0;
        for snapshot in expired {
            let key: BlobKey = match snapshot.location.parse() {
                Ok(key) => key,
                Err(e) => {
                    warn!(location = %snapshot.location, error = %e, "Unparseable backup location, dropping record");
                    self.manager.delete_backup_record(&snapshot.location).await?;
                    removed += 1;
                    continue;
                }
            };

            match self.manager.delete_blob(&key).await {
                Ok(_) => {
                    self.manager.delete_backup_record(&snapshot.location).await?;
                    removed += 1;
                }
                Err(e) => {
                    warn!(location = %snapshot.location, error = %e, "Failed to delete backup blob, keeping record");
                }
            }
        }

        info!(tenant_id, retention_days, removed, "Old backups cleaned up");
        Ok(removed)
    }
}

async fn replay(tx: &mut DurableTransaction, document: &BackupDocument) -> Result<RestoreSummary> {
    let tenant_id = document.tenant_id.as_str();
    tx.upsert_tenant(&document.tenant).await?;
    tx.clear_tenant_rows(tenant_id).await?;

    for message in &document.messages {
        tx.insert_message(message).await?;
    }
    for connection in &document.connections {
        tx.insert_connection(connection).await?;
    }
    for account in &document.economy.accounts {
        tx.insert_economy_account(account).await?;
    }
    for transaction in &document.economy.transactions {
        tx.insert_economy_transaction(transaction).await?;
    }
    for log in &document.conversation_logs {
        tx.insert_message(log).await?;
    }

    Ok(RestoreSummary {
        tenant_id: tenant_id.to_string(),
        location: String::new(),
        messages: document.messages.len(),
        conversation_logs: document.conversation_logs.len(),
        connections: document.connections.len(),
        economy_accounts: document.economy.accounts.len(),
        economy_transactions: document.economy.transactions.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        NewConnection, NewEconomyTransaction, NewMessage, NewTenant, TenantTable,
        MESSAGE_KIND_CONVERSATION,
    };
    use crate::testing;
    use assert_matches::assert_matches;

    async fn seeded() -> (StorageManager, BackupService) {
        let manager = testing::manager().await;
        let mut tenant = NewTenant::new("g1", "Guild One");
        tenant.channels = vec!["c1".into(), "c2".into()];
        manager.create_tenant(&tenant).await.unwrap();

        manager
            .create_message(&NewMessage::new("m1", "g1", "c1", "u1", "first"))
            .await
            .unwrap();
        manager
            .create_message(&NewMessage::new("m2", "g1", "c1", "u2", "second"))
            .await
            .unwrap();
        manager
            .create_message(
                &NewMessage::new("l1", "g1", "c2", "bot", "chat log").with_kind(MESSAGE_KIND_CONVERSATION),
            )
            .await
            .unwrap();
        manager
            .create_connection(&NewConnection {
                id: "x1".into(),
                tenant_id: "g1".into(),
                channel_id: "c1".into(),
                target_tenant_id: "g9".into(),
                target_channel_id: "c9".into(),
            })
            .await
            .unwrap();
        manager.adjust_balance("g1", "u1", 100).await.unwrap();
        manager
            .record_economy_transaction(&NewEconomyTransaction {
                tenant_id: "g1".into(),
                member_id: "u1".into(),
                amount: 100,
                kind: "daily".into(),
                description: None,
            })
            .await
            .unwrap();

        let service = BackupService::new(manager.clone());
        (manager, service)
    }

    async fn counts(manager: &StorageManager) -> Vec<u64> {
        let mut counts = Vec::new();
        for table in TenantTable::ALL {
            counts.push(manager.count_rows("g1", table).await.unwrap());
        }
        counts
    }

    #[tokio::test]
    async fn test_backup_then_restore_reproduces_tenant() {
        let (manager, service) = seeded().await;
        let before_counts = counts(&manager).await;
        let before_tenant = manager.durable().get_tenant("g1").await.unwrap().unwrap();

        let snapshot = service.create_backup("g1").await.unwrap();
        assert!(snapshot.location.starts_with("backups/g1/"));
        assert!(snapshot.location.ends_with(".json"));

        let mut tx = manager.begin_transaction().await.unwrap();
        tx.clear_tenant_rows("g1").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(counts(&manager).await, vec![0; 5]);

        let summary = service.restore_backup("g1", &snapshot.location).await.unwrap();
        assert_eq!(summary.messages, 2);
        assert_eq!(summary.conversation_logs, 1);

        assert_eq!(counts(&manager).await, before_counts);
        let after_tenant = manager.durable().get_tenant("g1").await.unwrap().unwrap();
        assert!(before_tenant.differing_fields(&after_tenant).is_empty());
    }

    #[tokio::test]
    async fn test_restore_recovers_deleted_messages() {
        let (manager, service) = seeded().await;
        let snapshot = service.create_backup("g1").await.unwrap();

        manager.durable().delete_messages_for_tenant("g1").await.unwrap();
        assert!(manager.get_message("m1", "g1").await.unwrap().is_none());

        service.restore_backup("g1", &snapshot.location).await.unwrap();
        assert_eq!(manager.get_message("m1", "g1").await.unwrap().unwrap().content, "first");
        assert_eq!(manager.get_message("m2", "g1").await.unwrap().unwrap().content, "second");
    }

    #[tokio::test]
    async fn test_failed_restore_leaves_no_partial_rows() {
        let (manager, service) = seeded().await;
        let snapshot = service.create_backup("g1").await.unwrap();
        let mut document = service.read_backup(&snapshot.location).await.unwrap();

        // Duplicate primary key: the second insert fails mid-restore
        document.messages.push(document.messages[0].clone());
        document.tenant.name = "Should Not Land".into();
        let key = BlobKey::new(BACKUP_BLOB_KIND, "g1", "broken.json").unwrap();
        manager.put_json(&key, &document).await.unwrap();

        manager.durable().delete_messages_for_tenant("g1").await.unwrap();
        let before = counts(&manager).await;

        let err = service.restore_backup("g1", &key.to_string()).await.unwrap_err();
        assert_matches!(err, Error::Database(_));

        assert_eq!(counts(&manager).await, before);
        let tenant = manager.durable().get_tenant("g1").await.unwrap().unwrap();
        assert_eq!(tenant.name, "Guild One");
    }

    #[tokio::test]
    async fn test_corrupt_backup_rejected_before_mutation() {
        let (manager, service) = seeded().await;
        let key = BlobKey::new(BACKUP_BLOB_KIND, "g1", "partial.json").unwrap();
        manager
            .put_json(&key, &serde_json::json!({ "version": 1, "tenant_id": "g1" }))
            .await
            .unwrap();
        let before = counts(&manager).await;

        let err = service.restore_backup("g1", &key.to_string()).await.unwrap_err();
        assert_matches!(err, Error::CorruptBackup { .. });
        assert_eq!(counts(&manager).await, before);
    }

    #[tokio::test]
    async fn test_restore_into_other_tenant_rejected() {
        let (_manager, service) = seeded().await;
        let snapshot = service.create_backup("g1").await.unwrap();
        let err = service.restore_backup("g2", &snapshot.location).await.unwrap_err();
        assert_matches!(err, Error::Validation(_));
    }

    #[tokio::test]
    async fn test_backup_of_missing_tenant() {
        let (_manager, service) = seeded().await;
        assert_matches!(
            service.create_backup("nope").await,
            Err(Error::TenantNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired_backups() {
        let (manager, service) = seeded().await;
        let fresh = service.create_backup("g1").await.unwrap();

        let old_at = from_millis(now_millis()) - Duration::days(45);
        let old_key = BlobKey::new(
            BACKUP_BLOB_KIND,
            "g1",
            format!("{}.json", old_at.timestamp_millis()),
        )
        .unwrap();
        manager.put_json(&old_key, &serde_json::json!({})).await.unwrap();
        manager
            .record_backup(&BackupSnapshot {
                tenant_id: "g1".into(),
                kind: BackupKind::Full,
                location: old_key.to_string(),
                size_bytes: 2,
                created_at: old_at,
            })
            .await
            .unwrap();

        let listed = service.list_backups("g1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].location, fresh.location);

        assert_eq!(service.cleanup_old_backups("g1", 30).await.unwrap(), 1);
        assert!(service.get_backup(&old_key.to_string()).await.unwrap().is_none());
        assert!(!manager.blob().exists(&old_key).await.unwrap());
        assert_eq!(service.list_backups("g1").await.unwrap().len(), 1);
    }
}

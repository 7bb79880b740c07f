//! Storage Manager
//!
//! The single entry point feature code talks to. Composes the cache, the
//! durable store and the blob store:
//!
//! - reads are cache-aside: cache first, durable store on a miss, then a
//!   best-effort cache fill;
//! - writes go to the durable store first and only then refresh the cache
//!   from the value the durable store now holds;
//! - blobs bypass the cache entirely.
//!
//! Every public operation is timed and its errors recorded through
//! [`MonitoringService`] before being returned unchanged.

use crate::blob::{build_object_store, BlobKey, BlobStore};
use crate::cache::{CacheKey, CacheStore, MemoryKeyValue, KIND_ANALYTICS, KIND_MEMBER};
use crate::config::StorageConfig;
use crate::domain::{
    tags, AnalyticsPeriod, AnalyticsReport, BackupSnapshot, ConnectionRecord, EconomyAccount,
    EconomyTransaction, MemberRecord, MemberUpdate, MessageFilter, MessageRecord, NewConnection,
    NewEconomyTransaction, NewMember, NewMessage, NewTenant, ObjectMeta, StoredObject, Tags,
    TenantRecord, TenantTable, TenantUpdate, VerificationRecord, VerificationStatus,
};
use crate::durable::{CleanupReport, DurableStore, DurableTransaction};
use crate::error::{Error, Result};
use crate::monitoring::MonitoringService;
use bytes::Bytes;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Orchestrator over the three stores
#[derive(Clone)]
pub struct StorageManager {
    cache: CacheStore,
    durable: DurableStore,
    blob: BlobStore,
    monitoring: Arc<MonitoringService>,
    analytics_ttl: Duration,
}

impl StorageManager {
    pub fn new(
        cache: CacheStore,
        durable: DurableStore,
        blob: BlobStore,
        monitoring: Arc<MonitoringService>,
        analytics_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            durable,
            blob,
            monitoring,
            analytics_ttl,
        }
    }

    /// Build every store and the monitoring service from configuration
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let cache = CacheStore::new(Arc::new(MemoryKeyValue::new()), &config.cache);
        let durable = DurableStore::connect(&config.database, config.retention.clone()).await?;
        let blob = BlobStore::new(build_object_store(&config.blob).await?);
        let monitoring = MonitoringService::from_config(
            durable.clone(),
            cache.clone(),
            blob.clone(),
            config.monitoring.clone(),
        )?;

        info!(
            cache = cache.backend_name(),
            blob = blob.backend_name(),
            "Storage manager initialized"
        );
        Ok(Self::new(
            cache,
            durable,
            blob,
            Arc::new(monitoring),
            config.cache.analytics_ttl(),
        ))
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn durable(&self) -> &DurableStore {
        &self.durable
    }

    pub fn blob(&self) -> &BlobStore {
        &self.blob
    }

    pub fn monitoring(&self) -> &Arc<MonitoringService> {
        &self.monitoring
    }

    /// Time `fut`, recording success latency or the error, and return its result unchanged
    async fn instrument<T, F>(&self, operation: &'static str, tags: Tags, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.monitoring.track_performance(operation, elapsed, &tags),
            Err(e) => {
                warn!(operation, error = %e, ?tags, "Storage operation failed");
                self.monitoring.track_error(operation, e, &tags);
            }
        }
        result
    }

    // =========================================================================
    // Tenants
    // =========================================================================

    pub async fn get_tenant(&self, id: &str) -> Result<Option<TenantRecord>> {
        self.instrument("get_tenant", tags([("tenant_id", id)]), async {
            let key = CacheKey::tenant(id);
            if let Some(tenant) = self.cache.get::<TenantRecord>(&key).await {
                return Ok(Some(tenant));
            }

            let tenant = self.durable.get_tenant(id).await?;
            if let Some(tenant) = &tenant {
                self.cache.set_default(&key, tenant).await;
            }
            Ok(tenant)
        })
        .await
    }

    pub async fn create_tenant(&self, tenant: &NewTenant) -> Result<TenantRecord> {
        self.instrument("create_tenant", tags([("tenant_id", tenant.id.as_str())]), async {
            let stored = self.durable.create_tenant(tenant).await?;
            self.cache.set_default(&CacheKey::tenant(&stored.id), &stored).await;
            Ok(stored)
        })
        .await
    }

    /// Partial update; `None` when the tenant does not exist
    pub async fn update_tenant(
        &self,
        id: &str,
        update: &TenantUpdate,
    ) -> Result<Option<TenantRecord>> {
        self.instrument("update_tenant", tags([("tenant_id", id)]), async {
            let key = CacheKey::tenant(id);
            match self.durable.update_tenant(id, update).await {
                Ok(Some(stored)) => {
                    self.cache.set_default(&key, &stored).await;
                    Ok(Some(stored))
                }
                // The write may have committed before the re-read failed
                other => {
                    self.cache.delete(&key).await;
                    other
                }
            }
        })
        .await
    }

    // =========================================================================
    // Members
    // =========================================================================

    pub async fn get_member(&self, id: &str, tenant_id: &str) -> Result<Option<MemberRecord>> {
        self.instrument(
            "get_member",
            tags([("tenant_id", tenant_id), ("member_id", id)]),
            async {
                let key = CacheKey::member(tenant_id, id);
                if let Some(member) = self.cache.get::<MemberRecord>(&key).await {
                    return Ok(Some(member));
                }

                let member = self.durable.get_member(id, tenant_id).await?;
                if let Some(member) = &member {
                    self.cache.set_default(&key, member).await;
                }
                Ok(member)
            },
        )
        .await
    }

    pub async fn create_member(&self, member: &NewMember) -> Result<MemberRecord> {
        self.instrument(
            "create_member",
            tags([
                ("tenant_id", member.tenant_id.as_str()),
                ("member_id", member.id.as_str()),
            ]),
            async {
                let stored = self.durable.create_member(member).await?;
                self.cache
                    .set_default(&CacheKey::member(&stored.tenant_id, &stored.id), &stored)
                    .await;
                Ok(stored)
            },
        )
        .await
    }

    pub async fn update_member(
        &self,
        id: &str,
        tenant_id: &str,
        update: &MemberUpdate,
    ) -> Result<Option<MemberRecord>> {
        self.instrument(
            "update_member",
            tags([("tenant_id", tenant_id), ("member_id", id)]),
            async {
                let key = CacheKey::member(tenant_id, id);
                match self.durable.update_member(id, tenant_id, update).await {
                    Ok(Some(stored)) => {
                        self.cache.set_default(&key, &stored).await;
                        Ok(Some(stored))
                    }
                    other => {
                        self.cache.delete(&key).await;
                        other
                    }
                }
            },
        )
        .await
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn get_message(&self, id: &str, tenant_id: &str) -> Result<Option<MessageRecord>> {
        self.instrument(
            "get_message",
            tags([("tenant_id", tenant_id), ("message_id", id)]),
            self.durable.get_message(id, tenant_id),
        )
        .await
    }

    pub async fn create_message(&self, message: &NewMessage) -> Result<MessageRecord> {
        self.instrument(
            "create_message",
            tags([
                ("tenant_id", message.tenant_id.as_str()),
                ("message_id", message.id.as_str()),
            ]),
            self.durable.create_message(message),
        )
        .await
    }

    pub async fn update_message(
        &self,
        id: &str,
        tenant_id: &str,
        content: &str,
    ) -> Result<Option<MessageRecord>> {
        self.instrument(
            "update_message",
            tags([("tenant_id", tenant_id), ("message_id", id)]),
            self.durable.update_message_content(id, tenant_id, content),
        )
        .await
    }

    pub async fn delete_message(&self, id: &str, tenant_id: &str) -> Result<bool> {
        self.instrument(
            "delete_message",
            tags([("tenant_id", tenant_id), ("message_id", id)]),
            self.durable.delete_message(id, tenant_id),
        )
        .await
    }

    pub async fn list_messages(
        &self,
        tenant_id: &str,
        filter: MessageFilter,
    ) -> Result<Vec<MessageRecord>> {
        self.instrument(
            "list_messages",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_messages(tenant_id, filter),
        )
        .await
    }

    // =========================================================================
    // Connections & Economy
    // =========================================================================

    pub async fn create_connection(&self, connection: &NewConnection) -> Result<ConnectionRecord> {
        self.instrument(
            "create_connection",
            tags([("tenant_id", connection.tenant_id.as_str())]),
            self.durable.create_connection(connection),
        )
        .await
    }

    pub async fn list_connections(&self, tenant_id: &str) -> Result<Vec<ConnectionRecord>> {
        self.instrument(
            "list_connections",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_connections(tenant_id),
        )
        .await
    }

    pub async fn get_economy_account(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> Result<Option<EconomyAccount>> {
        self.instrument(
            "get_economy_account",
            tags([("tenant_id", tenant_id), ("member_id", member_id)]),
            self.durable.get_economy_account(tenant_id, member_id),
        )
        .await
    }

    pub async fn set_economy_account(
        &self,
        tenant_id: &str,
        member_id: &str,
        balance: i64,
        bank: i64,
    ) -> Result<EconomyAccount> {
        self.instrument(
            "set_economy_account",
            tags([("tenant_id", tenant_id), ("member_id", member_id)]),
            self.durable
                .upsert_economy_account(tenant_id, member_id, balance, bank),
        )
        .await
    }

    /// Increment-style balance change
    pub async fn adjust_balance(
        &self,
        tenant_id: &str,
        member_id: &str,
        delta: i64,
    ) -> Result<EconomyAccount> {
        self.instrument(
            "adjust_balance",
            tags([("tenant_id", tenant_id), ("member_id", member_id)]),
            self.durable.adjust_balance(tenant_id, member_id, delta),
        )
        .await
    }

    pub async fn record_economy_transaction(
        &self,
        transaction: &NewEconomyTransaction,
    ) -> Result<EconomyTransaction> {
        self.instrument(
            "record_economy_transaction",
            tags([
                ("tenant_id", transaction.tenant_id.as_str()),
                ("member_id", transaction.member_id.as_str()),
            ]),
            self.durable.record_economy_transaction(transaction),
        )
        .await
    }

    pub async fn list_economy_accounts(&self, tenant_id: &str) -> Result<Vec<EconomyAccount>> {
        self.instrument(
            "list_economy_accounts",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_economy_accounts(tenant_id),
        )
        .await
    }

    pub async fn list_economy_transactions(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<EconomyTransaction>> {
        self.instrument(
            "list_economy_transactions",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_economy_transactions(tenant_id),
        )
        .await
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    /// Append a telemetry event; returns its id
    pub async fn track_event(
        &self,
        tenant_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<i64> {
        self.instrument(
            "track_event",
            tags([("tenant_id", tenant_id), ("event_type", event_type)]),
            self.durable
                .insert_telemetry(tenant_id, event_type, payload, Utc::now()),
        )
        .await
    }

    /// Event totals for the period, cached for a short fixed TTL
    pub async fn get_analytics(
        &self,
        tenant_id: &str,
        event_type: &str,
        period: AnalyticsPeriod,
    ) -> Result<AnalyticsReport> {
        self.instrument(
            "get_analytics",
            tags([("tenant_id", tenant_id), ("event_type", event_type)]),
            async {
                let key = CacheKey::analytics(tenant_id, event_type, period);
                if let Some(report) = self.cache.get::<AnalyticsReport>(&key).await {
                    return Ok(report);
                }

                let since = Utc::now() - period.duration();
                let buckets = self
                    .durable
                    .telemetry_buckets(tenant_id, event_type, since)
                    .await?;
                let report = AnalyticsReport {
                    tenant_id: tenant_id.to_string(),
                    event_type: event_type.to_string(),
                    period,
                    since,
                    total: buckets.iter().map(|b| b.count).sum(),
                    buckets,
                };

                self.cache.set(&key, &report, Some(self.analytics_ttl)).await;
                Ok(report)
            },
        )
        .await
    }

    // =========================================================================
    // Verification
    // =========================================================================

    pub async fn create_verification(
        &self,
        member_id: &str,
        tenant_id: &str,
        method: &str,
    ) -> Result<VerificationRecord> {
        self.instrument(
            "create_verification",
            tags([("tenant_id", tenant_id), ("member_id", member_id)]),
            self.durable.upsert_verification(member_id, tenant_id, method),
        )
        .await
    }

    /// Change status; `None` when no verification exists for the member
    pub async fn update_verification(
        &self,
        member_id: &str,
        tenant_id: &str,
        status: VerificationStatus,
    ) -> Result<Option<VerificationRecord>> {
        self.instrument(
            "update_verification",
            tags([
                ("tenant_id", tenant_id),
                ("member_id", member_id),
                ("status", status.as_str()),
            ]),
            self.durable
                .set_verification_status(member_id, tenant_id, status),
        )
        .await
    }

    pub async fn get_verification(
        &self,
        member_id: &str,
        tenant_id: &str,
    ) -> Result<Option<VerificationRecord>> {
        self.instrument(
            "get_verification",
            tags([("tenant_id", tenant_id), ("member_id", member_id)]),
            self.durable.get_verification(member_id, tenant_id),
        )
        .await
    }

    // =========================================================================
    // Files
    // =========================================================================

    pub async fn upload_file(
        &self,
        kind: &str,
        owner: &str,
        name: &str,
        data: Bytes,
        content_type: Option<String>,
        metadata: BTreeMap<String, String>,
    ) -> Result<ObjectMeta> {
        self.instrument(
            "upload_file",
            tags([("kind", kind), ("owner", owner), ("name", name)]),
            async {
                let key = BlobKey::new(kind, owner, name)?;
                self.blob.upload(&key, data, content_type, metadata).await
            },
        )
        .await
    }

    /// Download a file; `BlobNotFound` when absent
    pub async fn get_file(&self, kind: &str, owner: &str, name: &str) -> Result<StoredObject> {
        self.instrument(
            "get_file",
            tags([("kind", kind), ("owner", owner), ("name", name)]),
            async {
                let key = BlobKey::new(kind, owner, name)?;
                self.blob.download(&key).await
            },
        )
        .await
    }

    pub async fn delete_file(&self, kind: &str, owner: &str, name: &str) -> Result<bool> {
        self.instrument(
            "delete_file",
            tags([("kind", kind), ("owner", owner), ("name", name)]),
            async {
                let key = BlobKey::new(kind, owner, name)?;
                self.blob.delete(&key).await
            },
        )
        .await
    }

    pub async fn list_files(&self, kind: &str, owner: &str) -> Result<Vec<ObjectMeta>> {
        self.instrument(
            "list_files",
            tags([("kind", kind), ("owner", owner)]),
            self.blob.list_owned(kind, owner),
        )
        .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Retention pass over telemetry and pending verifications
    pub async fn run_cleanup(&self) -> Result<CleanupReport> {
        self.instrument("run_cleanup", Tags::new(), self.durable.cleanup())
            .await
    }

    /// Drop every cache entry owned by a tenant; returns entries removed
    pub async fn invalidate_tenant(&self, tenant_id: &str) -> usize {
        self.cache.delete(&CacheKey::tenant(tenant_id)).await;
        let members = self
            .cache
            .invalidate_prefix(&CacheKey::owner_prefix(KIND_MEMBER, tenant_id))
            .await;
        let analytics = self
            .cache
            .invalidate_prefix(&CacheKey::owner_prefix(KIND_ANALYTICS, tenant_id))
            .await;

        debug!(tenant_id, members, analytics, "Tenant cache invalidated");
        members + analytics
    }

    // =========================================================================
    // Backup & Migration Primitives
    // =========================================================================

    /// Open a durable transaction. No other durable call may be awaited
    /// while it is held.
    pub async fn begin_transaction(&self) -> Result<DurableTransaction> {
        self.durable.begin_transaction().await
    }

    pub async fn count_rows(&self, tenant_id: &str, table: TenantTable) -> Result<u64> {
        self.instrument(
            "count_rows",
            tags([("tenant_id", tenant_id), ("table", table.label())]),
            self.durable.count_for_tenant(tenant_id, table),
        )
        .await
    }

    /// Serialize `value` as JSON into the blob store
    pub async fn put_json<T: Serialize>(&self, key: &BlobKey, value: &T) -> Result<ObjectMeta> {
        self.instrument("put_json", tags([("key", key.to_string())]), async {
            let body = serde_json::to_vec_pretty(value)?;
            self.blob
                .upload(
                    key,
                    Bytes::from(body),
                    Some("application/json".into()),
                    BTreeMap::new(),
                )
                .await
        })
        .await
    }

    /// Download and decode a JSON blob
    pub async fn get_json<T: DeserializeOwned>(&self, key: &BlobKey) -> Result<T> {
        self.instrument("get_json", tags([("key", key.to_string())]), async {
            let object = self.blob.download(key).await?;
            Ok(serde_json::from_slice(&object.data)?)
        })
        .await
    }

    pub async fn delete_blob(&self, key: &BlobKey) -> Result<bool> {
        self.instrument(
            "delete_blob",
            tags([("key", key.to_string())]),
            self.blob.delete(key),
        )
        .await
    }

    pub async fn record_backup(&self, snapshot: &BackupSnapshot) -> Result<()> {
        self.instrument(
            "record_backup",
            tags([("tenant_id", snapshot.tenant_id.as_str())]),
            self.durable.insert_backup(snapshot),
        )
        .await
    }

    pub async fn list_backups(&self, tenant_id: &str) -> Result<Vec<BackupSnapshot>> {
        self.instrument(
            "list_backups",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_backups(tenant_id),
        )
        .await
    }

    pub async fn list_backups_before(
        &self,
        tenant_id: &str,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<BackupSnapshot>> {
        self.instrument(
            "list_backups",
            tags([("tenant_id", tenant_id)]),
            self.durable.list_backups_before(tenant_id, cutoff),
        )
        .await
    }

    pub async fn get_backup(&self, location: &str) -> Result<Option<BackupSnapshot>> {
        self.instrument(
            "get_backup",
            tags([("location", location)]),
            self.durable.get_backup(location),
        )
        .await
    }

    pub async fn delete_backup_record(&self, location: &str) -> Result<bool> {
        self.instrument(
            "delete_backup_record",
            tags([("location", location)]),
            self.durable.delete_backup(location),
        )
        .await
    }

    /// Fail with `TenantNotFound` unless the tenant exists
    pub async fn require_tenant(&self, tenant_id: &str) -> Result<TenantRecord> {
        self.get_tenant(tenant_id)
            .await?
            .ok_or_else(|| Error::TenantNotFound {
                tenant_id: tenant_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TenantSettings, MESSAGE_KIND_CONVERSATION};
    use crate::monitoring::{METRIC_OPERATION_DURATION, METRIC_OPERATION_ERROR};
    use crate::testing::{self, FailingKeyValue};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_get_after_update_returns_written_value() {
        let manager = testing::manager().await;
        manager.create_tenant(&NewTenant::new("g1", "Before")).await.unwrap();

        // Warm the cache with the old value
        assert_eq!(manager.get_tenant("g1").await.unwrap().unwrap().name, "Before");

        let update = TenantUpdate {
            name: Some("After".into()),
            ..Default::default()
        };
        let written = manager.update_tenant("g1", &update).await.unwrap().unwrap();
        let read = manager.get_tenant("g1").await.unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.name, "After");
    }

    #[tokio::test]
    async fn test_update_refreshes_cache_from_durable_state() {
        let manager = testing::manager().await;
        let mut new = NewTenant::new("g1", "Guild");
        new.roles = vec!["admin".into()];
        manager.create_tenant(&new).await.unwrap();

        // Partial update: only settings change, roles must survive in the cache copy
        let update = TenantUpdate {
            settings: Some(TenantSettings {
                locale: Some("de".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        manager.update_tenant("g1", &update).await.unwrap();

        let cached: TenantRecord = manager.cache().get(&CacheKey::tenant("g1")).await.unwrap();
        let durable = manager.durable().get_tenant("g1").await.unwrap().unwrap();
        assert_eq!(cached, durable);
        assert_eq!(cached.roles, vec!["admin".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_update_evicts_cached_tenant() {
        let manager = testing::manager().await;
        manager.create_tenant(&NewTenant::new("g1", "Before")).await.unwrap();
        assert_eq!(manager.get_tenant("g1").await.unwrap().unwrap().name, "Before");

        manager
            .durable()
            .execute("UPDATE tenants SET roles = 'not json' WHERE id = ?", &["g1".into()])
            .await
            .unwrap();

        let update = TenantUpdate {
            name: Some("After".into()),
            ..Default::default()
        };
        assert_matches!(
            manager.update_tenant("g1", &update).await,
            Err(Error::InvalidRecord { .. })
        );

        // The rename committed; the stale "Before" copy must not be served
        assert!(manager.cache().get::<TenantRecord>(&CacheKey::tenant("g1")).await.is_none());
        assert!(manager.get_tenant("g1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_update_evicts_cached_member() {
        let manager = testing::manager().await;
        manager.create_member(&NewMember::new("u1", "g1")).await.unwrap();
        let key = CacheKey::member("g1", "u1");
        assert!(manager.cache().get::<MemberRecord>(&key).await.is_some());

        manager
            .durable()
            .execute(
                "UPDATE members SET settings = '{' WHERE id = ? AND tenant_id = ?",
                &["u1".into(), "g1".into()],
            )
            .await
            .unwrap();

        let update = MemberUpdate {
            verified_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        assert!(manager.update_member("u1", "g1", &update).await.is_err());
        assert!(manager.cache().get::<MemberRecord>(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_colon_ids_do_not_share_cache_entries() {
        let manager = testing::manager().await;
        manager.create_member(&NewMember::new("x:u", "g1")).await.unwrap();
        let first = manager.get_member("x:u", "g1").await.unwrap().unwrap();
        assert_eq!(first.tenant_id, "g1");

        manager.create_member(&NewMember::new("u", "g1:x")).await.unwrap();
        let second = manager.get_member("u", "g1:x").await.unwrap().unwrap();
        assert_eq!(second.id, "u");
        assert_eq!(second.tenant_id, "g1:x");

        // Invalidating g1 leaves the g1:x member cached
        manager.invalidate_tenant("g1").await;
        assert!(manager
            .cache()
            .get::<MemberRecord>(&CacheKey::member("g1:x", "u"))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_cache_miss_falls_back_and_fills() {
        let manager = testing::manager().await;
        manager
            .durable()
            .create_member(&NewMember::new("u1", "g1"))
            .await
            .unwrap();

        let key = CacheKey::member("g1", "u1");
        assert!(manager.cache().get::<MemberRecord>(&key).await.is_none());
        let member = manager.get_member("u1", "g1").await.unwrap().unwrap();
        let cached: MemberRecord = manager.cache().get(&key).await.unwrap();
        assert_eq!(cached, member);
    }

    #[tokio::test]
    async fn test_failing_cache_still_serves_everything() {
        let manager = testing::manager_with_cache(Arc::new(FailingKeyValue)).await;

        manager.create_tenant(&NewTenant::new("g1", "Guild")).await.unwrap();
        let update = TenantUpdate {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        manager.update_tenant("g1", &update).await.unwrap();
        assert_eq!(manager.get_tenant("g1").await.unwrap().unwrap().name, "Renamed");

        manager.create_member(&NewMember::new("u1", "g1")).await.unwrap();
        assert!(manager.get_member("u1", "g1").await.unwrap().is_some());

        manager.track_event("g1", "command", &serde_json::json!({})).await.unwrap();
        let report = manager
            .get_analytics("g1", "command", AnalyticsPeriod::Day)
            .await
            .unwrap();
        assert_eq!(report.total, 1);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_none() {
        let manager = testing::manager().await;
        assert!(manager.get_tenant("nope").await.unwrap().is_none());
        let update = TenantUpdate {
            name: Some("x".into()),
            ..Default::default()
        };
        assert!(manager.update_tenant("nope", &update).await.unwrap().is_none());
        assert_matches!(
            manager.require_tenant("nope").await,
            Err(Error::TenantNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_analytics_cached_until_ttl() {
        let manager = testing::manager().await;
        let payload = serde_json::json!({ "command": "ping" });
        manager.track_event("g1", "command", &payload).await.unwrap();

        let first = manager
            .get_analytics("g1", "command", AnalyticsPeriod::Week)
            .await
            .unwrap();
        assert_eq!(first.total, 1);

        // Served from cache within the TTL window
        manager.track_event("g1", "command", &payload).await.unwrap();
        let second = manager
            .get_analytics("g1", "command", AnalyticsPeriod::Week)
            .await
            .unwrap();
        assert_eq!(second.total, 1);

        manager.invalidate_tenant("g1").await;
        let third = manager
            .get_analytics("g1", "command", AnalyticsPeriod::Week)
            .await
            .unwrap();
        assert_eq!(third.total, 2);
    }

    #[tokio::test]
    async fn test_blob_errors_are_recorded_and_returned() {
        let manager = testing::manager().await;
        let err = manager.get_file("attachments", "g1", "missing.png").await.unwrap_err();
        assert_matches!(err, Error::BlobNotFound { .. });

        manager.monitoring().flush().await;
        let errors = manager
            .monitoring()
            .get_metrics(Some(METRIC_OPERATION_ERROR), None, 10)
            .await
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].tags["operation"], "get_file");
        assert_eq!(errors[0].tags["owner"], "g1");
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_wait_on_metric_writes() {
        let manager = testing::manager().await;
        manager.create_tenant(&NewTenant::new("g1", "Guild")).await.unwrap();
        manager.monitoring().flush().await;

        // The transaction holds the only database connection
        let tx = manager.begin_transaction().await.unwrap();
        let tenant = tokio::time::timeout(Duration::from_secs(2), manager.get_tenant("g1"))
            .await
            .expect("cache hit waited on the metrics table")
            .unwrap()
            .unwrap();
        assert_eq!(tenant.name, "Guild");
        tx.commit().await.unwrap();

        manager.monitoring().flush().await;
        let samples = manager
            .monitoring()
            .get_metrics(Some(METRIC_OPERATION_DURATION), None, 10)
            .await
            .unwrap();
        assert!(samples.iter().any(|s| s.tags["operation"] == "get_tenant"));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let manager = testing::manager().await;
        manager
            .upload_file(
                "attachments",
                "g1",
                "a.txt",
                Bytes::from("hello"),
                Some("text/plain".into()),
                BTreeMap::new(),
            )
            .await
            .unwrap();

        let file = manager.get_file("attachments", "g1", "a.txt").await.unwrap();
        assert_eq!(file.data, Bytes::from("hello"));
        assert_eq!(manager.list_files("attachments", "g1").await.unwrap().len(), 1);
        assert!(manager.delete_file("attachments", "g1", "a.txt").await.unwrap());

        let bad = manager
            .upload_file("attachments", "g1", "../x", Bytes::new(), None, BTreeMap::new())
            .await;
        assert_matches!(bad, Err(Error::InvalidBlobKey(_)));
    }

    #[tokio::test]
    async fn test_verification_flow() {
        let manager = testing::manager().await;
        let created = manager.create_verification("u1", "g1", "captcha").await.unwrap();
        assert_eq!(created.status, VerificationStatus::Pending);

        let done = manager
            .update_verification("u1", "g1", VerificationStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, VerificationStatus::Completed);
        assert_eq!(
            manager.get_verification("u1", "g1").await.unwrap().unwrap().status,
            VerificationStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_message_operations() {
        let manager = testing::manager().await;
        manager
            .create_message(&NewMessage::new("m1", "g1", "c1", "u1", "hi"))
            .await
            .unwrap();
        manager
            .create_message(
                &NewMessage::new("m2", "g1", "c1", "bot", "log").with_kind(MESSAGE_KIND_CONVERSATION),
            )
            .await
            .unwrap();

        let ordinary = manager.list_messages("g1", MessageFilter::Ordinary).await.unwrap();
        assert_eq!(ordinary.len(), 1);
        let edited = manager.update_message("m1", "g1", "hello").await.unwrap().unwrap();
        assert_eq!(edited.content, "hello");
        assert!(manager.delete_message("m2", "g1").await.unwrap());
        assert_eq!(manager.count_rows("g1", TenantTable::ConversationLogs).await.unwrap(), 0);
    }
}

//! Cache Tier
//!
//! The fast path in front of the durable store. The cache is advisory: every
//! reader must tolerate a stale or missing entry, and every cache failure
//! degrades to "no cached value".
//!
//! # Usage
//!
//! ```ignore
//! use tenant_storage::cache::{CacheKey, CacheStore, MemoryKeyValue};
//!
//! let cache = CacheStore::new(Arc::new(MemoryKeyValue::new()), &config.cache);
//! cache.set_default(&CacheKey::tenant("g1"), &tenant).await;
//!
//! // Misses, service errors and undecodable values all come back as None
//! let cached: Option<TenantRecord> = cache.get(&CacheKey::tenant("g1")).await;
//! ```

pub mod key;
pub mod memory;
pub mod store;

pub use key::{CacheKey, KIND_ANALYTICS, KIND_MEMBER, KIND_TENANT};
pub use memory::{MemoryKeyValue, MemoryKeyValueConfig};
pub use store::{CacheStats, CacheStatsSnapshot, CacheStore};

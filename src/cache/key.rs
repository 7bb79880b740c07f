//! Cache Key Scheme
//!
//! Keys are `type:id[:subtype]`. Every key the storage layer writes comes
//! from one of the builders below, so unrelated callers cannot collide.
//! The id and subtype segments are percent-encoded, so a `:` inside a
//! tenant or member id never shifts a segment boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use urlencoding::{decode, encode};

use crate::domain::AnalyticsPeriod;

/// Namespace for tenant entries
pub const KIND_TENANT: &str = "tenant";
/// Namespace for member entries
pub const KIND_MEMBER: &str = "member";
/// Namespace for analytics aggregates
pub const KIND_ANALYTICS: &str = "analytics";

/// Unique identifier for a cached value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Entity type (e.g. "tenant", "member")
    pub kind: String,
    /// Primary identifier within the type
    pub id: String,
    /// Optional qualifier
    pub subtype: Option<String>,
}

impl CacheKey {
    /// Create a key without a subtype
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            subtype: None,
        }
    }

    /// Create a key with a subtype
    pub fn with_subtype(
        kind: impl Into<String>,
        id: impl Into<String>,
        subtype: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            subtype: Some(subtype.into()),
        }
    }

    pub fn tenant(tenant_id: &str) -> Self {
        Self::new(KIND_TENANT, tenant_id)
    }

    /// Members are grouped under their tenant so a tenant prefix covers them
    pub fn member(tenant_id: &str, member_id: &str) -> Self {
        Self::with_subtype(KIND_MEMBER, tenant_id, member_id)
    }

    pub fn analytics(tenant_id: &str, event_type: &str, period: AnalyticsPeriod) -> Self {
        Self::with_subtype(KIND_ANALYTICS, tenant_id, format!("{}:{}", event_type, period))
    }

    /// Prefix covering every key of `kind` owned by `id`
    pub fn owner_prefix(kind: &str, id: &str) -> String {
        format!("{}:{}:", kind, encode(id))
    }

    /// String form used by the key/value service
    pub fn to_storage_key(&self) -> String {
        match &self.subtype {
            Some(sub) => format!("{}:{}:{}", self.kind, encode(&self.id), encode(sub)),
            None => format!("{}:{}", self.kind, encode(&self.id)),
        }
    }

    /// Parse from storage key string
    pub fn from_storage_key(key: &str) -> Option<Self> {
        let parts: Vec<&str> = key.split(':').collect();
        match parts.as_slice() {
            [kind, id] if !kind.is_empty() && !id.is_empty() => {
                Some(Self::new(*kind, decode(id).ok()?))
            }
            [kind, id, sub] if !kind.is_empty() && !id.is_empty() => Some(Self::with_subtype(
                *kind,
                decode(id).ok()?,
                decode(sub).ok()?,
            )),
            _ => None,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_storage_key())
    }
}

//! Backup document format
//!
//! One JSON document per snapshot. Sections are validated structurally
//! before any row is touched.

use crate::domain::{ConnectionRecord, EconomyAccount, EconomyTransaction, MessageRecord, TenantRecord};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Current document format
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Top-level sections every document must carry
pub const REQUIRED_SECTIONS: &[&str] = &[
    "version",
    "tenant_id",
    "created_at",
    "tenant",
    "messages",
    "connections",
    "economy",
    "conversation_logs",
];

/// Economy tables of one tenant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EconomySection {
    pub accounts: Vec<EconomyAccount>,
    pub transactions: Vec<EconomyTransaction>,
}

/// Point-in-time export of one tenant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: u32,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub tenant: TenantRecord,
    /// Ordinary messages only
    pub messages: Vec<MessageRecord>,
    pub connections: Vec<ConnectionRecord>,
    pub economy: EconomySection,
    pub conversation_logs: Vec<MessageRecord>,
}

impl BackupDocument {
    /// Validate a raw document and decode it.
    ///
    /// Missing sections, an unknown version, undecodable rows or rows owned
    /// by another tenant all reject the document as corrupt.
    pub fn from_value(key: &str, raw: Value) -> Result<Self> {
        let corrupt = |reason: String| Error::CorruptBackup {
            key: key.to_string(),
            reason,
        };

        let Some(object) = raw.as_object() else {
            return Err(corrupt("document is not a JSON object".into()));
        };
        let missing: Vec<&str> = REQUIRED_SECTIONS
            .iter()
            .copied()
            .filter(|section| !object.contains_key(*section))
            .collect();
        if !missing.is_empty() {
            return Err(corrupt(format!("missing sections: {}", missing.join(", "))));
        }

        let document: BackupDocument =
            serde_json::from_value(raw).map_err(|e| corrupt(e.to_string()))?;

        if document.version != BACKUP_FORMAT_VERSION {
            return Err(corrupt(format!("unsupported version {}", document.version)));
        }
        if let Some(foreign) = document.foreign_row_owner() {
            return Err(corrupt(format!(
                "row owned by tenant {} in backup of {}",
                foreign, document.tenant_id
            )));
        }
        Ok(document)
    }

    fn foreign_row_owner(&self) -> Option<&str> {
        let own = self.tenant_id.as_str();
        std::iter::once(self.tenant.id.as_str())
            .chain(self.messages.iter().map(|m| m.tenant_id.as_str()))
            .chain(self.conversation_logs.iter().map(|m| m.tenant_id.as_str()))
            .chain(self.connections.iter().map(|c| c.tenant_id.as_str()))
            .chain(self.economy.accounts.iter().map(|a| a.tenant_id.as_str()))
            .chain(self.economy.transactions.iter().map(|t| t.tenant_id.as_str()))
            .find(|owner| *owner != own)
    }

    /// Total rows across all tenant-scoped sections
    pub fn row_count(&self) -> usize {
        self.messages.len()
            + self.conversation_logs.len()
            + self.connections.len()
            + self.economy.accounts.len()
            + self.economy.transactions.len()
    }
}

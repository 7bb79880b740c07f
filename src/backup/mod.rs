//! Backup & Restore
//!
//! Snapshots live in the blob store under `backups/{tenant}/{millis}.json`;
//! their metadata lives in the durable store.

pub mod document;
pub mod service;

pub use document::{BackupDocument, EconomySection, BACKUP_FORMAT_VERSION, REQUIRED_SECTIONS};
pub use service::{BackupService, RestoreSummary, BACKUP_BLOB_KIND};

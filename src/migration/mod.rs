//! Tenant Migration

pub mod report;
pub mod service;

pub use report::{CategoryCheck, MigrationReport, MigrationSummary, TenantCheck};
pub use service::MigrationService;

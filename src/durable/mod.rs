//! Durable store
//!
//! The relational source of truth. Schema creation, typed CRUD for every
//! tenant-scoped entity, raw parameterized queries, transactions and the
//! operational tables used by monitoring and backup.

pub mod codec;
pub mod ops;
pub mod query;
pub mod schema;
pub mod store;
pub mod transaction;

pub use query::SqlValue;
pub use store::{CleanupReport, DurableStore};
pub use transaction::{ClearedRows, DurableTransaction};

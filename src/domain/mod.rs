//! Domain layer - Records and port definitions
//!
//! This module defines the typed records every store exchanges and the
//! traits (ports) that backend adapters implement.

pub mod models;
pub mod ops;
pub mod ports;

pub use models::*;
pub use ops::*;
pub use ports::*;

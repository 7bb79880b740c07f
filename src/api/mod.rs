//! API Module
//!
//! Operator HTTP surface over the storage layer.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;

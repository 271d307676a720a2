//! Shared types and stock rules for the Ceramic Production Inventory
//!
//! This crate holds the I/O-free part of the system: stages, records,
//! movements, allocations and the rules that keep availability non-negative.

pub mod models;
pub mod stock;
pub mod types;
pub mod validation;

pub use models::*;
pub use stock::*;
pub use types::*;
pub use validation::*;

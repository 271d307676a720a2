//! Domain models for the Ceramic Production Inventory

mod allocation;
mod inventory;

pub use allocation::*;
pub use inventory::*;

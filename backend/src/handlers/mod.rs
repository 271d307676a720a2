//! HTTP handlers

pub mod allocation;
pub mod health;
pub mod inventory;

pub use allocation::*;
pub use health::*;
pub use inventory::*;

//! Local SQLite state: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: typed records returned by repositories.
//! - `repo`: SQL-only functions that map rows into records.
//!
//! The repository API is re-exported at `creative_ledger::db::*`.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{LeaseRecord, StoredRow};

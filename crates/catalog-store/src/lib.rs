//! Catalog Store - SQLite persistence for the entity catalog and change ledger
//!
//! Provides:
//! - Connection management and embedded, checksummed migrations
//! - The entity repository (current rows, versions, relations, natural keys,
//!   sources)
//! - The change repository (change-sets and their Changes)
//! - Loading the schema registry from YAML or JSON files

pub mod db;
pub mod errors;
pub mod migrations;
pub mod repo;
pub mod schema_loader;

pub use errors::Result;
pub use repo::{ChangeRepo, EntityRepo};

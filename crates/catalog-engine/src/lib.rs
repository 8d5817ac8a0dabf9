//! Catalog Engine - change application
//!
//! Turns a validated mutation graph into a change-set and applies it to the
//! entity store as one atomic unit:
//! - `commands::build`: expand a graph into ledger Changes
//! - `resolver`: blank and concrete reference resolution
//! - `commands::apply`: two-phase create/update plus merges
//! - `commands::merge`: redirect of duplicate entities
//! - `commands::submit`: validate → build → apply, and change-set retry

pub mod commands;
pub mod config;
pub mod resolver;

pub use commands::apply::{apply_change_set, AppliedEntity};
pub use commands::build::build_change_set;
pub use commands::submit::{submit, ChangeSetResult, SubmitError, Submitter};
pub use config::EngineConfig;
pub use resolver::{BlankScope, Resolver};

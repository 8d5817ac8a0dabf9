//! Catalog Core - pure domain kernel for graph ingestion
//!
//! This crate owns everything that can be decided without touching storage:
//! - Identifiers (blank vs. persistent node ids, change/version ids)
//! - The mutation graph wire model and typed field values
//! - The schema registry consulted by validation and application
//! - Entity, version and change ledger models
//! - The graph validator
//! - The error and logging facilities shared by the other crates

pub mod errors;
pub mod logging_facility;
pub mod model;
pub mod rules;

pub use catalog_core_types as core_types;

pub use errors::{CatalogError, ExError, ExErrorKind, Result};
pub use model::{
    BlankId, Change, ChangeId, ChangeKind, ChangePayload, ChangeSet, ChangeSetId, ChangeSetStatus,
    Entity, EntityId, EntityRef, FieldKind, FieldSpec, FieldValue, GraphNode, MergeDirective,
    MutationGraph, NewChange, NodeId, Reference, RegistryDocument, RelationValue, SchemaRegistry,
    TypeSpec, Version, VersionId,
};
pub use rules::graph_validation::{validate, ValidationErrors, Violation, ViolationKind};

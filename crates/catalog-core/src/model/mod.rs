//! Domain model for graph ingestion
//!
//! - `ids`: node, entity, change and version identifiers
//! - `schema`: the schema registry (type → field specs)
//! - `graph`: the submitted mutation graph
//! - `field`: typed field values, classified against a field spec
//! - `entity`: current entity state and immutable versions
//! - `change`: change-sets and changes (the ledger)

pub mod change;
pub mod entity;
pub mod field;
pub mod graph;
pub mod ids;
pub mod schema;

pub use change::{Change, ChangeKind, ChangePayload, ChangeSet, ChangeSetStatus, NewChange};
pub use entity::{Entity, RelationValue, Version};
pub use field::FieldValue;
pub use graph::{GraphNode, MergeDirective, MutationGraph, Reference};
pub use ids::{BlankId, ChangeId, ChangeSetId, EntityId, EntityRef, NodeId, VersionId};
pub use schema::{FieldKind, FieldSpec, RegistryDocument, SchemaRegistry, TypeSpec};

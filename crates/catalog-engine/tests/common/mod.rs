#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use catalog_core::{
    EntityId, FieldKind, FieldSpec, MutationGraph, NodeId, SchemaRegistry, TypeSpec,
};
use catalog_engine::ChangeSetResult;
use rusqlite::Connection;
use serde_json::json;

pub const SUBMITTER: &str = "harvester.oai";

/// Person (natural key `orcid`), Contributor and CreativeWork
///
/// `Person.mentor` opts out of merge redirects.
pub fn registry() -> SchemaRegistry {
    let mut types = BTreeMap::new();
    types.insert(
        "Person".to_string(),
        TypeSpec::default()
            .with_field("name", FieldSpec::new(FieldKind::String).required())
            .with_field("orcid", FieldSpec::new(FieldKind::String).nullable())
            .with_field(
                "friend",
                FieldSpec::new(FieldKind::Reference).nullable().targets(&["Person"]),
            )
            .with_field(
                "mentor",
                FieldSpec::new(FieldKind::Reference)
                    .nullable()
                    .targets(&["Person"])
                    .no_redirect(),
            )
            .with_natural_key(&["orcid"]),
    );
    types.insert(
        "Contributor".to_string(),
        TypeSpec::default()
            .with_field("cited_as", FieldSpec::new(FieldKind::String))
            .with_field(
                "person",
                FieldSpec::new(FieldKind::Reference).targets(&["Person"]),
            ),
    );
    types.insert(
        "CreativeWork".to_string(),
        TypeSpec::default()
            .with_field("title", FieldSpec::new(FieldKind::String).required())
            .with_field(
                "author",
                FieldSpec::new(FieldKind::Reference).nullable().targets(&["Person"]),
            )
            .with_field(
                "contributors",
                FieldSpec::new(FieldKind::ReferenceList).targets(&["Contributor"]),
            ),
    );
    SchemaRegistry::new("test-1", types).unwrap()
}

pub fn conn() -> Connection {
    catalog_store::db::open_in_memory_migrated().unwrap()
}

pub fn graph(value: serde_json::Value) -> MutationGraph {
    serde_json::from_value(value).unwrap()
}

pub fn reference(id: &str, entity_type: &str) -> serde_json::Value {
    json!({ "@id": id, "@type": entity_type })
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })
    .unwrap()
}

/// Entity created for the blank node `node` in an accepted result
pub fn created(result: &ChangeSetResult, node: &str) -> EntityId {
    let node = NodeId::try_from(node.to_string()).unwrap();
    result
        .entities
        .iter()
        .find(|e| e.node_id == node)
        .map(|e| e.entity.id.clone())
        .unwrap_or_else(|| panic!("no entity for node {}", node))
}

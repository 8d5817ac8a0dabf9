use std::collections::BTreeMap;

use catalog_core::{FieldKind, FieldSpec, GraphNode, NodeId, SchemaRegistry, TypeSpec};

/// A small bibliographic schema shared by the integration tests
#[allow(dead_code)]
pub fn registry() -> SchemaRegistry {
    let mut types = BTreeMap::new();
    types.insert(
        "Person".to_string(),
        TypeSpec::default()
            .with_field("name", FieldSpec::new(FieldKind::String).required())
            .with_field("orcid", FieldSpec::new(FieldKind::String).nullable())
            .with_field(
                "friend",
                FieldSpec::new(FieldKind::Reference)
                    .targets(&["Person"])
                    .nullable(),
            ),
    );
    types.insert(
        "Contributor".to_string(),
        TypeSpec::default()
            .with_field("cited_as", FieldSpec::new(FieldKind::String))
            .with_field(
                "role",
                FieldSpec::new(FieldKind::Choice {
                    choices: vec!["author".to_string(), "editor".to_string()],
                })
                .with_default(serde_json::json!("author")),
            ),
    );
    types.insert(
        "CreativeWork".to_string(),
        TypeSpec::default()
            .with_field("title", FieldSpec::new(FieldKind::String).required())
            .with_field("is_deleted", FieldSpec::new(FieldKind::Boolean))
            .with_field("page_count", FieldSpec::new(FieldKind::Integer))
            .with_field(
                "author",
                FieldSpec::new(FieldKind::Reference).targets(&["Person"]),
            )
            .with_field(
                "contributors",
                FieldSpec::new(FieldKind::ReferenceList).targets(&["Contributor"]),
            ),
    );
    SchemaRegistry::new("test-1", types).unwrap()
}

#[allow(dead_code)]
pub fn node(id: &str, node_type: &str) -> GraphNode {
    GraphNode::new(NodeId::try_from(id.to_string()).unwrap(), node_type)
}

#[allow(dead_code)]
pub fn reference(id: &str, node_type: &str) -> serde_json::Value {
    serde_json::json!({"@id": id, "@type": node_type})
}

//! Reference resolution
//!
//! A reference names either a node of the same change-set (blank) or a
//! stored entity (concrete). Blank references are answered from the
//! [`BlankScope`] filled while the change-set's own nodes are materialized;
//! concrete references are looked up in the entity store and followed
//! through `same_as` redirects to the canonical entity.

use std::collections::HashMap;

use catalog_core::errors::{CatalogError, ExError};
use catalog_core::model::{BlankId, EntityId, EntityRef, NodeId, Reference, SchemaRegistry};
use catalog_store::errors::Result;
use catalog_store::EntityRepo;
use rusqlite::Connection;

/// Blank identifier → entity map for one change-set
///
/// Keys pair the blank identifier with the declared spelling of its type, so
/// `_:1` as a Person and `_:1` as a CreativeWork are distinct nodes.
#[derive(Debug, Default)]
pub struct BlankScope {
    entries: HashMap<(BlankId, String), EntityId>,
}

impl BlankScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, blank: BlankId, entity_type: &str, id: EntityId) {
        self.entries.insert((blank, entity_type.to_string()), id);
    }

    pub fn get(&self, blank: &BlankId, entity_type: &str) -> Option<&EntityId> {
        self.entries.get(&(blank.clone(), entity_type.to_string()))
    }
}

/// Resolves references against a populated scope and the store
pub struct Resolver<'a> {
    conn: &'a Connection,
    registry: &'a SchemaRegistry,
    scope: &'a BlankScope,
}

impl<'a> Resolver<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SchemaRegistry, scope: &'a BlankScope) -> Self {
        Self {
            conn,
            registry,
            scope,
        }
    }

    /// Concrete, canonical target of `reference`
    ///
    /// # Errors
    ///
    /// - `SchemaViolation` if the reference names an unknown type
    /// - `UnresolvedReference` for a blank identifier the scope does not hold
    /// - `NotFound` for a concrete identifier with no entity of that type
    pub fn resolve(&self, reference: &Reference) -> Result<EntityRef> {
        let entity_type = self
            .registry
            .resolve_type(&reference.ref_type)
            .ok_or_else(|| {
                ExError::from(CatalogError::UnknownType {
                    type_name: reference.ref_type.clone(),
                })
                .with_op("resolve_reference")
                .with_node_id(reference.id.as_str())
            })?;

        match &reference.id {
            NodeId::Blank(blank) => {
                let id = self.scope.get(blank, entity_type).ok_or_else(|| {
                    ExError::from(CatalogError::UnresolvedReference {
                        ref_id: blank.to_string(),
                        ref_type: entity_type.to_string(),
                        reason: "no node with this identifier and type in the change-set"
                            .to_string(),
                    })
                    .with_op("resolve_reference")
                })?;
                Ok(EntityRef::new(entity_type, id.clone()))
            }
            NodeId::Concrete(id) => {
                let entity = EntityRepo::resolve_canonical(self.conn, entity_type, id)?
                    .ok_or_else(|| {
                        ExError::from(CatalogError::EntityNotFound {
                            entity_type: entity_type.to_string(),
                            entity_id: id.to_string(),
                        })
                        .with_op("resolve_reference")
                    })?;
                Ok(entity.entity_ref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::errors::ExErrorKind;
    use catalog_core::model::{Entity, FieldKind, FieldSpec, TypeSpec};
    use std::collections::BTreeMap;

    fn registry() -> SchemaRegistry {
        let mut types = BTreeMap::new();
        types.insert(
            "Person".to_string(),
            TypeSpec::default().with_field("name", FieldSpec::new(FieldKind::String)),
        );
        SchemaRegistry::new("t", types).unwrap()
    }

    fn node(s: &str) -> NodeId {
        NodeId::try_from(s.to_string()).unwrap()
    }

    #[test]
    fn test_blank_resolves_through_scope_case_insensitively() {
        let conn = catalog_store::db::open_in_memory_migrated().unwrap();
        let reg = registry();
        let mut scope = BlankScope::new();
        scope.insert(BlankId::parse("_:1").unwrap(), "Person", EntityId::from_string("p1"));

        let resolver = Resolver::new(&conn, &reg, &scope);
        let target = resolver
            .resolve(&Reference::new(node("_:1"), "person"))
            .unwrap();
        assert_eq!(target, EntityRef::new("Person", EntityId::from_string("p1")));
    }

    #[test]
    fn test_missing_blank_is_unresolved() {
        let conn = catalog_store::db::open_in_memory_migrated().unwrap();
        let reg = registry();
        let scope = BlankScope::new();

        let err = Resolver::new(&conn, &reg, &scope)
            .resolve(&Reference::new(node("_:9"), "Person"))
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::UnresolvedReference);
        assert_eq!(err.node_id(), Some("_:9"));
    }

    #[test]
    fn test_concrete_follows_redirect() {
        let conn = catalog_store::db::open_in_memory_migrated().unwrap();
        let reg = registry();
        let mut old = Entity::new("Person", EntityId::from_string("old"), 1);
        let new = Entity::new("Person", EntityId::from_string("new"), 1);
        EntityRepo::insert_entity(&conn, &old).unwrap();
        EntityRepo::insert_entity(&conn, &new).unwrap();
        old.same_as = Some(new.id.clone());
        EntityRepo::update_entity(&conn, &old).unwrap();

        let scope = BlankScope::new();
        let resolver = Resolver::new(&conn, &reg, &scope);
        let target = resolver
            .resolve(&Reference::new(node("old"), "Person"))
            .unwrap();
        assert_eq!(target.id.as_str(), "new");

        let err = resolver
            .resolve(&Reference::new(node("nobody"), "Person"))
            .unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::NotFound);
    }
}

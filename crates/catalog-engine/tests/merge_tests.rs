#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use catalog_core::{ChangeKind, EntityId, ExErrorKind, SchemaRegistry};
use catalog_engine::{apply_change_set, build_change_set, submit, ChangeSetResult, SubmitError};
use catalog_store::EntityRepo;
use common::{conn, count, created, graph, reference, registry, SUBMITTER};
use rusqlite::Connection;
use serde_json::json;

struct Fixture {
    e1: EntityId,
    e2: EntityId,
    works: Vec<EntityId>,
}

/// Persons E1 and E2, referenced by three works: two by E1, one by E2
fn fixture(conn: &mut Connection, reg: &SchemaRegistry) -> Fixture {
    let result = submit(
        conn,
        reg,
        &graph(json!({"@graph": [
            {"@id": "_:e1", "@type": "Person", "name": "A. Smith"},
            {"@id": "_:e2", "@type": "Person", "name": "Anne Smith"},
            {"@id": "_:a", "@type": "CreativeWork", "title": "A", "author": reference("_:e1", "Person")},
            {"@id": "_:b", "@type": "CreativeWork", "title": "B", "author": reference("_:e1", "Person")},
            {"@id": "_:c", "@type": "CreativeWork", "title": "C", "author": reference("_:e2", "Person")}
        ]})),
        SUBMITTER,
    )
    .unwrap();
    assert!(result.is_accepted(), "{:?}", result.errors);
    Fixture {
        e1: created(&result, "_:e1"),
        e2: created(&result, "_:e2"),
        works: vec![
            created(&result, "_:a"),
            created(&result, "_:b"),
            created(&result, "_:c"),
        ],
    }
}

fn merge(conn: &mut Connection, reg: &SchemaRegistry, from: &[&EntityId], into: &EntityId) -> ChangeSetResult {
    let from: Vec<_> = from.iter().map(|id| reference(id.as_str(), "Person")).collect();
    submit(
        conn,
        reg,
        &graph(json!({"@graph": [{
            "@id": "_:m", "@type": "Person",
            "@merge": {"from": from, "into": reference(into.as_str(), "Person")}
        }]})),
        SUBMITTER,
    )
    .unwrap()
}

fn author(conn: &Connection, work: &EntityId) -> EntityId {
    EntityRepo::load_relations(conn, work).unwrap()["author"].targets()[0]
        .id
        .clone()
}

#[test]
fn test_merge_redirects_every_referrer_without_changing_row_counts() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);
    let entities = count(&conn, "entities");
    let relations = count(&conn, "entity_relations");

    let result = merge(&mut conn, &reg, &[&f.e1], &f.e2);

    assert!(result.is_accepted(), "{:?}", result.errors);
    assert_eq!(result.entities.len(), 1);
    assert_eq!(result.entities[0].kind, ChangeKind::Merge);
    assert_eq!(result.entities[0].entity.id, f.e2);

    for work in &f.works {
        assert_eq!(author(&conn, work), f.e2);
    }
    let e1 = EntityRepo::get_entity(&conn, &f.e1).unwrap().unwrap();
    assert_eq!(e1.same_as, Some(f.e2.clone()));
    let e2 = EntityRepo::get_entity(&conn, &f.e2).unwrap().unwrap();
    assert_eq!(e1.same_as_version, e2.version_id);

    assert_eq!(count(&conn, "entities"), entities);
    assert_eq!(count(&conn, "entity_relations"), relations);
}

#[test]
fn test_merge_co_dates_every_touched_row() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);

    merge(&mut conn, &reg, &[&f.e1], &f.e2);

    let stamp = EntityRepo::get_entity(&conn, &f.e1).unwrap().unwrap().modified_at;
    for work in &f.works[..2] {
        let w = EntityRepo::get_entity(&conn, work).unwrap().unwrap();
        assert_eq!(w.modified_at, stamp);
        assert_eq!(EntityRepo::list_versions(&conn, work).unwrap().len(), 2);
    }
    // C already pointed at E2 and is not part of the merge
    assert_eq!(EntityRepo::list_versions(&conn, &f.works[2]).unwrap().len(), 1);
}

#[test]
fn test_merged_entity_stays_resolvable_with_its_history() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);
    let v1 = EntityRepo::list_versions(&conn, &f.e1).unwrap().remove(0);

    merge(&mut conn, &reg, &[&f.e1], &f.e2);

    let canonical = EntityRepo::resolve_canonical(&conn, "Person", &f.e1)
        .unwrap()
        .unwrap();
    assert_eq!(canonical.id, f.e2);
    let versions = EntityRepo::list_versions(&conn, &f.e1).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0], v1);
}

#[test]
fn test_redirected_relations_are_pinned_to_the_canonical_version() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);

    merge(&mut conn, &reg, &[&f.e1], &f.e2);

    let e2_version = EntityRepo::get_entity(&conn, &f.e2)
        .unwrap()
        .unwrap()
        .version_id
        .unwrap();
    let stale: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM entity_relations WHERE target_id = ?1 AND target_version_id != ?2",
            rusqlite::params![f.e2.as_str(), e2_version.0],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(stale, 0);
}

#[test]
fn test_opted_out_field_keeps_pointing_at_the_duplicate() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);
    let student = created(
        &submit(
            &mut conn,
            &reg,
            &graph(json!({"@graph": [{
                "@id": "_:s", "@type": "Person", "name": "Student",
                "mentor": reference(f.e1.as_str(), "Person"),
                "friend": reference(f.e1.as_str(), "Person")
            }]})),
            SUBMITTER,
        )
        .unwrap(),
        "_:s",
    );

    merge(&mut conn, &reg, &[&f.e1], &f.e2);

    let relations = EntityRepo::load_relations(&conn, &student).unwrap();
    assert_eq!(relations["friend"].targets()[0].id, f.e2);
    assert_eq!(relations["mentor"].targets()[0].id, f.e1);
}

#[test]
fn test_merge_of_a_missing_entity_is_rejected() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);
    let ghost = EntityId::from_string("no-such-person");

    let result = merge(&mut conn, &reg, &[&ghost], &f.e2);

    let SubmitError::Apply(err) = &result.errors[0] else {
        panic!("expected an apply error");
    };
    assert_eq!(err.kind(), ExErrorKind::NotFound);
    for work in &f.works[..2] {
        assert_eq!(author(&conn, work), f.e1);
    }
}

#[test]
fn test_merge_naming_an_entity_under_the_wrong_type_is_not_found() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);

    let result = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [{
            "@id": "_:m", "@type": "Person",
            "@merge": {"from": [reference(f.works[0].as_str(), "Person")],
                       "into": reference(f.e2.as_str(), "Person")}
        }]})),
        SUBMITTER,
    )
    .unwrap();

    let SubmitError::Apply(err) = &result.errors[0] else {
        panic!("expected an apply error");
    };
    assert_eq!(err.kind(), ExErrorKind::NotFound);
}

fn person(conn: &mut Connection, reg: &SchemaRegistry, name: &str, orcid: &str) -> EntityId {
    let result = submit(
        conn,
        reg,
        &graph(json!({"@graph": [{"@id": "_:p", "@type": "Person", "name": name, "orcid": orcid}]})),
        SUBMITTER,
    )
    .unwrap();
    assert!(result.is_accepted(), "{:?}", result.errors);
    created(&result, "_:p")
}

#[test]
fn test_resubmitting_a_merged_record_updates_the_canonical_entity() {
    let mut conn = conn();
    let reg = registry();
    let e1 = person(&mut conn, &reg, "A. Smith", "0000-1");
    let e2 = person(&mut conn, &reg, "Anne Smith", "0000-2");
    assert!(merge(&mut conn, &reg, &[&e1], &e2).is_accepted());
    let entities = count(&conn, "entities");

    let result = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [
            {"@id": "_:again", "@type": "Person", "name": "A. Smith", "orcid": "0000-1"}
        ]})),
        SUBMITTER,
    )
    .unwrap();

    assert!(result.is_accepted(), "{:?}", result.errors);
    assert_eq!(result.entities[0].kind, ChangeKind::Update);
    assert_eq!(result.entities[0].entity.id, e2);
    assert_eq!(count(&conn, "entities"), entities);
    let canonical = EntityRepo::get_entity(&conn, &e2).unwrap().unwrap();
    assert_eq!(canonical.fields["orcid"], json!("0000-1"));
}

#[test]
fn test_create_colliding_with_a_merged_key_holder_lands_on_the_canonical_entity() {
    let mut conn = conn();
    let reg = registry();
    // Planned while nobody holds the key, so it is recorded as a create
    let pending = build_change_set(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [
            {"@id": "_:late", "@type": "Person", "name": "C. Jones", "orcid": "0000-3"}
        ]})),
        SUBMITTER,
    )
    .unwrap()
    .unwrap();
    let e3 = person(&mut conn, &reg, "C. Jones", "0000-3");
    let e4 = person(&mut conn, &reg, "Cat Jones", "0000-4");
    assert!(merge(&mut conn, &reg, &[&e3], &e4).is_accepted());

    let applied = apply_change_set(&mut conn, &reg, pending).unwrap();

    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].kind, ChangeKind::Update);
    assert_eq!(applied[0].entity.id, e4);
    assert_eq!(count(&conn, "entities"), 2);
}

#[test]
fn test_merge_into_a_node_created_in_the_same_graph() {
    let mut conn = conn();
    let reg = registry();
    let f = fixture(&mut conn, &reg);

    let result = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [
            {"@id": "_:n", "@type": "Person", "name": "Anne M. Smith"},
            {"@id": "_:m", "@type": "Person",
             "@merge": {"from": [reference(f.e1.as_str(), "Person")],
                        "into": reference("_:n", "Person")}}
        ]})),
        SUBMITTER,
    )
    .unwrap();

    assert!(result.is_accepted(), "{:?}", result.errors);
    let canonical = created(&result, "_:n");
    for work in &f.works[..2] {
        assert_eq!(author(&conn, work), canonical);
    }
    assert_eq!(author(&conn, &f.works[2]), f.e2);
    let e1 = EntityRepo::get_entity(&conn, &f.e1).unwrap().unwrap();
    assert_eq!(e1.same_as, Some(canonical));
}

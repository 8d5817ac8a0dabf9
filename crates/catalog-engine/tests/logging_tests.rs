#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use catalog_core::core_types::schema::{EVENT_END, EVENT_END_ERROR, EVENT_START};
use catalog_core::logging_facility::test_capture::init_test_capture;
use catalog_engine::submit;
use catalog_store::EntityRepo;
use common::{conn, created, graph, reference, registry, SUBMITTER};
use serde_json::json;

// Single test: the capture is process-wide and the op names are shared.
#[test]
fn test_submission_logs_one_boundary_per_operation() {
    let capture = init_test_capture();
    let mut conn = conn();
    let reg = registry();

    let accepted = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [{"@id": "_:1", "@type": "Person", "name": "A. Smith"}]})),
        SUBMITTER,
    )
    .unwrap();
    let change_set_id = accepted.change_set_id.unwrap().0.to_string();

    for op in ["submit", "build_change_set", "apply_change_set"] {
        capture.assert_event_exists(op, EVENT_START);
        capture.assert_event_exists(op, EVENT_END);
    }
    let ends: Vec<_> = capture
        .events_for_op("apply_change_set")
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END))
        .collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(ends[0].field("change_set_id"), Some(change_set_id.as_str()));

    submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [{"@id": "missing", "@type": "Person", "name": "Ghost"}]})),
        SUBMITTER,
    )
    .unwrap();

    let errors: Vec<_> = capture
        .events_for_op("apply_change_set")
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END_ERROR))
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].field("err_code"), Some("ERR_NOT_FOUND"));
    assert_eq!(errors[0].level, tracing::Level::ERROR);

    let people = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [
            {"@id": "_:a", "@type": "Person", "name": "A. Smith"},
            {"@id": "_:b", "@type": "Person", "name": "Anne Smith"},
            {"@id": "_:w", "@type": "CreativeWork", "title": "W", "author": reference("_:a", "Person")}
        ]})),
        SUBMITTER,
    )
    .unwrap();
    let (dup, canonical) = (created(&people, "_:a"), created(&people, "_:b"));
    let merged = submit(
        &mut conn,
        &reg,
        &graph(json!({"@graph": [{"@id": "_:m", "@type": "Person", "@merge": {
            "from": [reference(dup.as_str(), "Person")],
            "into": reference(canonical.as_str(), "Person")
        }}]})),
        SUBMITTER,
    )
    .unwrap();
    assert!(merged.is_accepted(), "{:?}", merged.errors);

    let merge_ends: Vec<_> = capture
        .events_for_op("merge")
        .into_iter()
        .filter(|e| e.event.as_deref() == Some(EVENT_END))
        .collect();
    assert_eq!(merge_ends.len(), 1);
    assert_eq!(merge_ends[0].field("merged_count"), Some("1"));
    // the work and the duplicate
    assert_eq!(merge_ends[0].field("touched_count"), Some("2"));
    let stamp = EntityRepo::get_entity(&conn, &dup).unwrap().unwrap().modified_at;
    assert_eq!(merge_ends[0].field("modified_at"), Some(stamp.to_string().as_str()));
}

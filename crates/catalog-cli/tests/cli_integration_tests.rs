//! CLI integration tests
//!
//! Drive the `catalog` binary end to end against a scratch database.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use rusqlite::Connection;
use tempfile::TempDir;

const SCHEMA: &str = r#"
version: "2016-09"
types:
  Person:
    fields:
      name: {kind: string, required: true}
      orcid: {kind: string, nullable: true}
    natural_key: [orcid]
  CreativeWork:
    fields:
      title: {kind: string, required: true}
      author: {kind: reference, relation_targets: [Person]}
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn catalog(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_catalog"))
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_validate_reports_dangling_blank_reference() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.yaml", SCHEMA);
    let graph = write(
        &dir,
        "graph.json",
        r#"{"@graph": [{"@id": "_:1", "@type": "CreativeWork", "title": "T",
            "author": {"@id": "_:2", "@type": "Person"}}]}"#,
    );

    let output = catalog(&["validate", "--schema", arg(&schema), arg(&graph)]);

    assert!(!output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["code"], "ERR_UNRESOLVED_REFERENCE");
    assert_eq!(report["violations"][0]["node_id"], "_:2");
    assert_eq!(report["violations"][0]["node_type"], "Person");
}

#[test]
fn test_submit_then_inspect_history_and_change_set() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.yaml", SCHEMA);
    let db = dir.path().join("catalog.db");
    let graph = write(
        &dir,
        "graph.json",
        r#"{"@graph": [
            {"@id": "_:p", "@type": "Person", "name": "A. Smith", "orcid": "0000-0001"},
            {"@id": "_:w", "@type": "CreativeWork", "title": "On Graphs",
             "author": {"@id": "_:p", "@type": "Person"}}
        ]}"#,
    );

    let output = catalog(&[
        "submit",
        "--db",
        arg(&db),
        "--schema",
        arg(&schema),
        "--submitter",
        "harvester.oai",
        arg(&graph),
    ]);
    assert!(
        output.status.success(),
        "submit failed. Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "accepted");
    assert_eq!(result["entities"].as_array().unwrap().len(), 2);

    let conn = Connection::open(&db).unwrap();
    let person_id: String = conn
        .query_row(
            "SELECT id FROM entities WHERE entity_type = 'Person'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    drop(conn);

    let output = catalog(&[
        "history",
        "--db",
        arg(&db),
        "--type",
        "Person",
        "--id",
        &person_id,
    ]);
    assert!(output.status.success());
    let history: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(history["fields"]["name"], "A. Smith");
    assert_eq!(history["versions"].as_array().unwrap().len(), 1);
    assert_eq!(history["sources"][0], "harvester.oai");

    let change_set_id = result["change_set_id"].as_i64().unwrap().to_string();
    let output = catalog(&["change-set", "--db", arg(&db), "--id", &change_set_id]);
    assert!(output.status.success());
    let cs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(cs["status"], "accepted");
    assert_eq!(cs["schema_version"], "2016-09");
    assert_eq!(cs["changes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_rejected_submission_exits_non_zero() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.yaml", SCHEMA);
    let db = dir.path().join("catalog.db");
    let graph = write(
        &dir,
        "graph.json",
        r#"{"@graph": [{"@id": "no-such-person", "@type": "Person", "name": "Ghost"}]}"#,
    );

    let output = catalog(&[
        "submit",
        "--db",
        arg(&db),
        "--schema",
        arg(&schema),
        "--submitter",
        "harvester.oai",
        arg(&graph),
    ]);

    assert!(!output.status.success());
    let result: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "rejected");
    assert_eq!(result["errors"][0]["code"], "ERR_NOT_FOUND");
}

#[test]
fn test_schema_path_can_come_from_config() {
    let dir = TempDir::new().unwrap();
    let schema = write(&dir, "schema.yaml", SCHEMA);
    let config = write(
        &dir,
        "catalog.toml",
        &format!(
            "[schema]\npath = {:?}\n\n[logging]\nprofile = \"test\"\n",
            arg(&schema)
        ),
    );
    let graph = write(
        &dir,
        "graph.json",
        r#"{"@graph": [{"@id": "_:1", "@type": "Person", "name": "A. Smith"}]}"#,
    );

    let output = catalog(&["validate", "--config", arg(&config), arg(&graph)]);

    assert!(
        output.status.success(),
        "Stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("valid: 1 node(s)"));
}

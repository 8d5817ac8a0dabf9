// Migration discipline: fresh databases get every table, re-running is a
// no-op, on-disk databases keep their ledger across reopen.

use rusqlite::Connection;

fn setup_test_db() -> Connection {
    Connection::open_in_memory().expect("Failed to create in-memory database")
}

fn get_table_names(conn: &Connection) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .unwrap();
    stmt.query_map([], |row| row.get(0))
        .unwrap()
        .collect::<Result<Vec<String>, _>>()
        .unwrap()
}

#[test]
fn test_apply_migrations_on_empty_db() {
    let mut conn = setup_test_db();

    let result = catalog_store::migrations::apply_migrations(&mut conn);
    assert!(
        result.is_ok(),
        "Migrations should succeed: {:?}",
        result.err()
    );

    let tables = get_table_names(&conn);
    for expected_table in [
        "schema_version",
        "entities",
        "entity_versions",
        "entity_relations",
        "entity_keys",
        "entity_sources",
        "change_sets",
        "changes",
    ] {
        assert!(
            tables.contains(&expected_table.to_string()),
            "Missing table: {}",
            expected_table
        );
    }
}

#[test]
fn test_migrations_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");

    {
        let conn = catalog_store::db::open_and_migrate(&path, 1_000).unwrap();
        conn.execute(
            "INSERT INTO change_sets (submitter, schema_version, submitted_at) VALUES ('oai', 'v1', 1)",
            [],
        )
        .unwrap();
    }

    let conn = catalog_store::db::open_and_migrate(&path, 1_000).unwrap();
    let applied = catalog_store::migrations::applied_migrations(&conn).unwrap();
    assert_eq!(applied, vec!["001_entity_store", "002_change_store"]);
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM change_sets", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 1);
}

#[test]
fn test_file_database_uses_wal() {
    let dir = tempfile::tempdir().unwrap();
    let conn = catalog_store::db::open_and_migrate(dir.path().join("wal.db"), 1_000).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

use inventory_core::db::migrations::latest_version;
use inventory_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(1);

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "resource");
    assert_table_exists(&conn, "reporter_resource");
    assert_table_exists(&conn, "reporter_representation");
    assert_table_exists(&conn, "common_representation");
    assert_table_exists(&conn, "outbox_events");
    assert_table_exists(&conn, "processed_transactions");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inventory.db");

    let conn_first = open_db(&path, BUSY_TIMEOUT).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path, BUSY_TIMEOUT).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "reporter_representation");
}

#[test]
fn file_databases_run_in_wal_mode() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(dir.path().join("inventory.db"), BUSY_TIMEOUT).unwrap();

    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, BUSY_TIMEOUT).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn reporter_snapshots_reject_update_and_delete() {
    let conn = open_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO reporter_resource (
            id, local_resource_id, reporter_type, resource_type, reporter_instance_id,
            resource_id, api_href, representation_version, generation
        ) VALUES ('rr-1', 'h1', 'hbi', 'host', 'i1', 'res-1', 'https://a/h1', 1, 0);",
        [],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO reporter_representation (
            reporter_resource_id, version, generation, data, common_version
        ) VALUES ('rr-1', 1, 0, '{}', 1);",
        [],
    )
    .unwrap();

    let update = conn.execute(
        "UPDATE reporter_representation SET data = '{\"x\":1}';",
        [],
    );
    assert!(update.is_err());
    let delete = conn.execute("DELETE FROM reporter_representation;", []);
    assert!(delete.is_err());
}

#[test]
fn natural_key_is_unique_regardless_of_case() {
    let conn = open_db_in_memory().unwrap();
    let insert = |id: &str, local_resource_id: &str| {
        conn.execute(
            "INSERT INTO reporter_resource (
                id, local_resource_id, reporter_type, resource_type, reporter_instance_id,
                resource_id, api_href, representation_version, generation
            ) VALUES (?1, ?2, 'hbi', 'host', 'i1', 'res-1', 'https://a/h1', 1, 0);",
            [id, local_resource_id],
        )
    };

    insert("rr-1", "h1").unwrap();
    assert!(insert("rr-2", "H1").is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}

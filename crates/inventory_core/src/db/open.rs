//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open file or in-memory SQLite connections.
//! - Configure connection pragmas required by store behavior.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have `foreign_keys=ON` and a busy timeout.
//! - File connections run in WAL mode so readers keep a stable snapshot.
//! - `open_db*` connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// Opens a SQLite database file and applies all pending migrations.
///
/// # Side effects
/// - Performs connection bootstrap and migration checks.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=file");

    let mut conn = match Connection::open(path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    let bootstrap =
        configure_connection(&conn, busy_timeout).and_then(|()| apply_migrations(&mut conn));
    match bootstrap {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode=file duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode=file duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

/// Opens an in-memory SQLite database and applies all pending migrations.
///
/// Each call yields an isolated database; used by repository unit tests.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    let mut conn = Connection::open_in_memory()?;
    configure_connection(&conn, Duration::from_secs(5))?;
    apply_migrations(&mut conn)?;
    info!(
        "event=db_open module=db status=ok mode=memory duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

/// Opens a per-operation connection to an already migrated database file.
///
/// Connections are never shared across threads; every transaction gets its
/// own handle and drops it when the transaction ends.
pub fn open_connection(path: impl AsRef<Path>, busy_timeout: Duration) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    configure_connection(&conn, busy_timeout)?;
    Ok(conn)
}

fn configure_connection(conn: &Connection, busy_timeout: Duration) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(busy_timeout)?;
    // In-memory databases report `memory` here; only file databases switch.
    let _mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    Ok(())
}

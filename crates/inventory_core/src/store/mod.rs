//! Transactional store over one SQLite database file.
//!
//! # Responsibility
//! - Apply migrations once, then hand out per-operation transactions.
//! - Bind the resource repository to a transaction's connection.
//! - Expose the outbox `EventSource` for the relay.
//!
//! # Invariants
//! - Each `Tx` owns its own connection; connections never cross threads.
//! - `Tx::commit` is idempotent; `Tx::rollback` is a no-op once finished.
//! - Dropping an unfinished `Tx` rolls it back.
//!
//! WAL plus deferred transactions gives snapshot reads and a single writer.
//! A transaction whose snapshot went stale before its first write fails with
//! `SQLITE_BUSY`, which the retry loop treats as a serialization failure.

pub mod context;
pub mod outbox;
pub mod retry;

use crate::config::StoreConfig;
use crate::db::{self, migrations};
use crate::error::{StoreError, StoreResult};
use crate::repo::SqliteResourceRepository;
use log::{info, warn};
use outbox::SqliteEventSource;
use retry::{NoopRetryObserver, RetryObserver};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Cloneable handle to the inventory database.
#[derive(Clone)]
pub struct Store {
    path: Arc<PathBuf>,
    config: Arc<StoreConfig>,
    observer: Arc<dyn RetryObserver>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Validates `config`, migrates the database at `path` and returns a handle.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        config.validate().map_err(StoreError::Config)?;
        let path = path.as_ref().to_path_buf();
        let conn = db::open_db(&path, config.busy_timeout())?;
        drop(conn);
        info!(
            "event=store_open module=store status=ok max_retries={}",
            config.max_serialization_retries
        );
        Ok(Self {
            path: Arc::new(path),
            config: Arc::new(config),
            observer: Arc::new(NoopRetryObserver),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    pub(crate) fn observer(&self) -> &dyn RetryObserver {
        self.observer.as_ref()
    }

    /// Starts a deferred transaction on a fresh connection.
    pub fn begin(&self) -> StoreResult<Tx> {
        let conn = db::open_connection(self.path.as_path(), self.config.busy_timeout())?;
        Tx::begin(conn)
    }

    /// Outbox reader/acknowledger on its own connections.
    pub fn event_source(&self) -> SqliteEventSource {
        SqliteEventSource::new(self.path.as_path(), self.config.busy_timeout())
    }

    /// Schema version recorded in the database file.
    pub fn schema_version(&self) -> StoreResult<u32> {
        let conn = db::open_connection(self.path.as_path(), self.config.busy_timeout())?;
        Ok(migrations::current_user_version(&conn)?)
    }
}

/// One open transaction.
pub struct Tx {
    conn: Connection,
    finished: bool,
}

impl Tx {
    fn begin(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch("BEGIN DEFERRED;")?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// Repository bound to this transaction.
    pub fn resource_repository(&self) -> SqliteResourceRepository<'_> {
        SqliteResourceRepository::new(&self.conn)
    }

    pub fn commit(&mut self) -> StoreResult<()> {
        if self.finished {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT;")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(&mut self) -> StoreResult<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        // SQLite may already have rolled back after a failed statement.
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if let Err(err) = self.rollback() {
            warn!(
                "event=tx_rollback module=store status=error error_code=rollback_failed error={}",
                err
            );
        }
    }
}

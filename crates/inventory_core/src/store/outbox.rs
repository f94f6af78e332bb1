//! Transactional outbox access.
//!
//! # Responsibility
//! - Insert outbox rows on the mutating transaction's connection.
//! - Read pending rows and acknowledge delivered ones for the relay.
//! - Hand out time-limited delivery claims so concurrent relays never
//!   produce the same event twice.
//!
//! # Invariants
//! - An event is acknowledged at most once; later acknowledgements report `false`.
//! - Pending rows are returned in insertion order.
//! - At most one claimant holds an unexpired claim on a pending event.

use crate::db;
use crate::error::{StoreError, StoreResult};
use crate::model::event::{AggregateType, OperationType, OutboxEvent};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

const OUTBOX_SELECT_SQL: &str = "SELECT
    id,
    aggregate_type,
    aggregate_id,
    operation,
    transaction_id,
    payload,
    created_at,
    acknowledged_at,
    claimed_by,
    claimed_at
FROM outbox_events";

/// Wall clock in epoch milliseconds; `strftime('%s')` only has second precision.
const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

/// Read/acknowledge side of the outbox.
pub trait EventSource {
    /// Oldest pending events, at most `limit`.
    fn pending(&self, limit: u32) -> StoreResult<Vec<OutboxEvent>>;
    /// Pending events written under one transaction id.
    fn pending_for_transaction(&self, transaction_id: &str) -> StoreResult<Vec<OutboxEvent>>;
    /// Takes the delivery claim on a pending event for `lease`.
    ///
    /// Returns `false` when the event is acknowledged or another claimant
    /// took it less than `lease` ago. The same claimant may renew its own claim.
    fn claim(&self, event_id: Uuid, claimant: &str, lease: Duration) -> StoreResult<bool>;
    /// Gives a claim back after a failed delivery. Returns `false` when
    /// `claimant` no longer holds it.
    fn release(&self, event_id: Uuid, claimant: &str) -> StoreResult<bool>;
    /// Marks one event delivered. Returns `false` when it already was.
    fn acknowledge(&self, event_id: Uuid) -> StoreResult<bool>;
    fn pending_count(&self) -> StoreResult<u64>;
    fn get(&self, event_id: Uuid) -> StoreResult<Option<OutboxEvent>>;
}

/// SQLite event source opening one connection per call.
#[derive(Debug, Clone)]
pub struct SqliteEventSource {
    path: PathBuf,
    busy_timeout: Duration,
}

impl SqliteEventSource {
    pub fn new(path: impl AsRef<Path>, busy_timeout: Duration) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout,
        }
    }

    fn connect(&self) -> StoreResult<Connection> {
        Ok(db::open_connection(&self.path, self.busy_timeout)?)
    }
}

impl EventSource for SqliteEventSource {
    fn pending(&self, limit: u32) -> StoreResult<Vec<OutboxEvent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{OUTBOX_SELECT_SQL}
             WHERE acknowledged_at IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ?1;"
        ))?;
        let mut rows = stmt.query([i64::from(limit)])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_outbox_row(row)?);
        }
        Ok(events)
    }

    fn pending_for_transaction(&self, transaction_id: &str) -> StoreResult<Vec<OutboxEvent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{OUTBOX_SELECT_SQL}
             WHERE acknowledged_at IS NULL
               AND transaction_id = ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([transaction_id])?;
        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            events.push(parse_outbox_row(row)?);
        }
        Ok(events)
    }

    fn claim(&self, event_id: Uuid, claimant: &str, lease: Duration) -> StoreResult<bool> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let conn = self.connect()?;
        let changed = conn.execute(
            &format!(
                "UPDATE outbox_events
                 SET claimed_by = ?2,
                     claimed_at = {NOW_MS_SQL}
                 WHERE id = ?1
                   AND acknowledged_at IS NULL
                   AND (claimed_by IS NULL
                        OR claimed_by = ?2
                        OR claimed_at <= {NOW_MS_SQL} - ?3);"
            ),
            params![event_id.to_string(), claimant, lease_ms],
        )?;
        Ok(changed == 1)
    }

    fn release(&self, event_id: Uuid, claimant: &str) -> StoreResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE outbox_events
             SET claimed_by = NULL,
                 claimed_at = NULL
             WHERE id = ?1
               AND claimed_by = ?2
               AND acknowledged_at IS NULL;",
            params![event_id.to_string(), claimant],
        )?;
        Ok(changed == 1)
    }

    fn acknowledge(&self, event_id: Uuid) -> StoreResult<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE outbox_events
             SET acknowledged_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND acknowledged_at IS NULL;",
            [event_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    fn pending_count(&self) -> StoreResult<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM outbox_events WHERE acknowledged_at IS NULL;",
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| StoreError::InvalidData(format!("negative outbox count `{count}`")))
    }

    fn get(&self, event_id: Uuid) -> StoreResult<Option<OutboxEvent>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{OUTBOX_SELECT_SQL} WHERE id = ?1;"))?;
        let row = stmt
            .query_row([event_id.to_string()], |row| Ok(parse_outbox_row(row)))
            .optional()?;
        row.transpose()
    }
}

/// Inserts one outbox row on the caller's transaction connection.
pub(crate) fn insert_outbox_event(conn: &Connection, event: &OutboxEvent) -> StoreResult<()> {
    let payload = serde_json::to_string(&event.payload)
        .map_err(|err| StoreError::InvalidData(format!("unserializable outbox payload: {err}")))?;
    conn.execute(
        "INSERT INTO outbox_events (
            id,
            aggregate_type,
            aggregate_id,
            operation,
            transaction_id,
            payload
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
        params![
            event.id.to_string(),
            event.aggregate_type.as_str(),
            event.aggregate_id.as_str(),
            event.operation.as_str(),
            event.transaction_id.as_str(),
            payload,
        ],
    )?;
    Ok(())
}

fn parse_outbox_row(row: &Row<'_>) -> StoreResult<OutboxEvent> {
    let id_text: String = row.get("id")?;
    let id = Uuid::parse_str(&id_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{id_text}` in outbox_events.id"))
    })?;

    let aggregate_text: String = row.get("aggregate_type")?;
    let aggregate_type = AggregateType::parse(&aggregate_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid aggregate type `{aggregate_text}` in outbox_events.aggregate_type"
        ))
    })?;

    let operation_text: String = row.get("operation")?;
    let operation = OperationType::parse(&operation_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid operation `{operation_text}` in outbox_events.operation"
        ))
    })?;

    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text).map_err(|err| {
        StoreError::InvalidData(format!("invalid json in outbox_events.payload: {err}"))
    })?;

    Ok(OutboxEvent {
        id,
        aggregate_type,
        aggregate_id: row.get("aggregate_id")?,
        operation,
        transaction_id: row.get("transaction_id")?,
        payload,
        created_at: row.get("created_at")?,
        acknowledged_at: row.get("acknowledged_at")?,
        claimed_by: row.get("claimed_by")?,
        claimed_at: row.get("claimed_at")?,
    })
}

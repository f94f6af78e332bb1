//! Resource repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist one logical operation as an ordered set of row writes.
//! - Resolve reporter keys to pointers, snapshots and canonical state.
//! - Keep the processed-transaction ledger next to the rows it guards.
//!
//! # Invariants
//! - `save` writes resource, reporter resource, reporter snapshot, canonical
//!   state, outbox event and ledger entry, in that order, on one connection.
//! - Reporter snapshots are insert-only; the schema rejects updates.
//! - Key lookups are case-insensitive through the column collation.

use crate::error::{StoreError, StoreResult};
use crate::model::change_set::{ChangeSet, PointerWrite, ResourceWrite};
use crate::model::event::{
    AggregateType, OperationType, OutboxEvent, ResourceEventPayload,
};
use crate::model::outcome::{
    MutationOutcome, OutcomeKind, ProcessedTransaction, RequestKind, TransactionId,
};
use crate::model::reporter_resource::{ReporterResource, ReporterResourceId, ReporterResourceKey};
use crate::model::representation::{
    CommonRepresentation, Representation, ReporterRepresentation, Representations,
};
use crate::model::resource::{Resource, ResourceId};
use crate::model::validation::{
    counter_from_db, FieldValidator, MAX_CONSISTENCY_TOKEN_LEN, MIN_COMMON_VERSION,
    MIN_GENERATION, MIN_VERSION,
};
use crate::store::outbox::insert_outbox_event;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const RESOURCE_SELECT_SQL: &str = "SELECT
    id,
    common_version,
    type,
    ktn,
    tombstone,
    created_at,
    updated_at
FROM resource";

const REPORTER_RESOURCE_SELECT_SQL: &str = "SELECT
    id,
    local_resource_id,
    reporter_type,
    resource_type,
    reporter_instance_id,
    resource_id,
    api_href,
    console_href,
    representation_version,
    generation,
    tombstone,
    created_at,
    updated_at
FROM reporter_resource rr";

const REPORTER_REPRESENTATION_SELECT_SQL: &str = "SELECT
    reporter_resource_id,
    version,
    generation,
    data,
    reporter_version,
    common_version,
    transaction_id,
    tombstone,
    created_at
FROM reporter_representation";

const COMMON_REPRESENTATION_SELECT_SQL: &str = "SELECT
    resource_id,
    version,
    data,
    reported_by_reporter_type,
    reported_by_reporter_instance,
    transaction_id,
    created_at
FROM common_representation";

const LEDGER_SELECT_SQL: &str = "SELECT
    transaction_id,
    operation,
    outcome,
    resource_id,
    reporter_resource_id,
    representation_version,
    generation,
    common_version,
    tombstone,
    created_at
FROM processed_transactions";

const KEY_PREDICATE_SQL: &str = "local_resource_id = ?1
  AND reporter_type = ?2
  AND resource_type = ?3
  AND reporter_instance_id = ?4";

/// Storage contract for the inventory use cases.
pub trait ResourceRepository {
    /// Fresh time-ordered canonical resource id.
    fn next_resource_id(&self) -> StoreResult<ResourceId>;
    /// Fresh time-ordered reporter resource id.
    fn next_reporter_resource_id(&self) -> StoreResult<ReporterResourceId>;
    /// Persists one create/update/revive/delete and its ledger entry.
    fn save(
        &self,
        change_set: &ChangeSet,
        operation: OperationType,
        transaction_id: &TransactionId,
    ) -> StoreResult<MutationOutcome>;
    /// Current canonical resource for a reporter key.
    fn find_resource_by_keys(&self, key: &ReporterResourceKey) -> StoreResult<Resource>;
    /// Canonical state at `current_version` (latest when `None`) and the one before it.
    fn find_current_and_previous_versioned_representations(
        &self,
        key: &ReporterResourceKey,
        current_version: Option<u64>,
        operation: OperationType,
    ) -> StoreResult<(Option<Representations>, Option<Representations>)>;
    /// Latest reporter snapshot and latest canonical state for a key.
    fn find_latest_representations(&self, key: &ReporterResourceKey)
        -> StoreResult<Representations>;
    fn has_transaction_id_been_processed(&self, transaction_id: &str) -> StoreResult<bool>;
    fn find_reporter_resource(
        &self,
        key: &ReporterResourceKey,
    ) -> StoreResult<Option<ReporterResource>>;
    fn find_processed_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<ProcessedTransaction>>;
    /// Live reporter resources of one resource, most recently reported first.
    fn find_live_reporter_resources(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Vec<ReporterResource>>;
    fn find_current_resource(&self, resource_id: ResourceId) -> StoreResult<Option<Resource>>;
    fn find_current_common_representation(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Option<CommonRepresentation>>;
    fn find_latest_reporter_representation(
        &self,
        reporter_resource_id: ReporterResourceId,
    ) -> StoreResult<Option<ReporterRepresentation>>;
    /// Full snapshot history of a key, ordered by `(generation, version)`.
    fn list_reporter_representations(
        &self,
        key: &ReporterResourceKey,
    ) -> StoreResult<Vec<ReporterRepresentation>>;
    /// Canonical history of a resource, ordered by version.
    fn list_common_representations(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Vec<CommonRepresentation>>;
    /// Stores an authorizer token on the current canonical row, unmodified.
    fn update_consistency_token(&self, resource_id: ResourceId, token: &str) -> StoreResult<()>;
    /// Ledger entry for operations that wrote no rows; skipped for generated ids.
    fn record_processed_transaction(
        &self,
        request: RequestKind,
        outcome: &MutationOutcome,
    ) -> StoreResult<()>;
    fn append_outbox_event(&self, event: &OutboxEvent) -> StoreResult<()>;
}

/// SQLite-backed resource repository bound to one connection.
pub struct SqliteResourceRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteResourceRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn insert_resource(&self, resource: &Resource) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO resource (
                id,
                common_version,
                type,
                ktn,
                tombstone
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                resource.id.to_string(),
                db_counter(resource.common_version)?,
                resource.resource_type.as_str(),
                resource.consistency_token.as_str(),
                bool_to_int(resource.tombstone),
            ],
        )?;
        Ok(())
    }

    fn mark_resource_tombstone(&self, resource: &Resource) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE resource
             SET
                tombstone = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND common_version = ?2;",
            params![
                resource.id.to_string(),
                db_counter(resource.common_version)?
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::ResourceNotFound(format!(
                "resource {} at common version {}",
                resource.id, resource.common_version
            )));
        }
        Ok(())
    }

    fn insert_reporter_resource(&self, pointer: &ReporterResource) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO reporter_resource (
                id,
                local_resource_id,
                reporter_type,
                resource_type,
                reporter_instance_id,
                resource_id,
                api_href,
                console_href,
                representation_version,
                generation,
                tombstone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11);",
            params![
                pointer.id.to_string(),
                pointer.key.local_resource_id.as_str(),
                pointer.key.reporter_type.as_str(),
                pointer.key.resource_type.as_str(),
                pointer.key.reporter_instance_id.as_str(),
                pointer.resource_id.to_string(),
                pointer.api_href.as_str(),
                pointer.console_href.as_deref(),
                db_counter(pointer.representation_version)?,
                db_counter(pointer.generation)?,
                bool_to_int(pointer.tombstone),
            ],
        )?;
        Ok(())
    }

    fn update_reporter_resource(&self, pointer: &ReporterResource) -> StoreResult<()> {
        let changed = self.conn.execute(
            "UPDATE reporter_resource
             SET
                resource_id = ?1,
                api_href = ?2,
                console_href = ?3,
                representation_version = ?4,
                generation = ?5,
                tombstone = ?6,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?7;",
            params![
                pointer.resource_id.to_string(),
                pointer.api_href.as_str(),
                pointer.console_href.as_deref(),
                db_counter(pointer.representation_version)?,
                db_counter(pointer.generation)?,
                bool_to_int(pointer.tombstone),
                pointer.id.to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found_for_key(&pointer.key));
        }
        Ok(())
    }

    fn insert_reporter_representation(&self, snapshot: &ReporterRepresentation) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO reporter_representation (
                reporter_resource_id,
                version,
                generation,
                data,
                reporter_version,
                common_version,
                transaction_id,
                tombstone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                snapshot.reporter_resource_id.to_string(),
                db_counter(snapshot.version)?,
                db_counter(snapshot.generation)?,
                data_to_db(&snapshot.data)?,
                snapshot.reporter_version.as_deref(),
                db_counter(snapshot.common_version)?,
                snapshot.transaction_id.as_str(),
                bool_to_int(snapshot.tombstone),
            ],
        )?;
        Ok(())
    }

    fn insert_common_representation(&self, common: &CommonRepresentation) -> StoreResult<()> {
        self.conn.execute(
            "INSERT INTO common_representation (
                resource_id,
                version,
                data,
                reported_by_reporter_type,
                reported_by_reporter_instance,
                transaction_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                common.resource_id.to_string(),
                db_counter(common.version)?,
                data_to_db(&common.data)?,
                common.reported_by_reporter_type.as_str(),
                common.reported_by_reporter_instance.as_str(),
                common.transaction_id.as_str(),
            ],
        )?;
        Ok(())
    }

    /// Generated ids cannot be replayed, so only caller ids are recorded.
    fn insert_ledger_entry(
        &self,
        request: RequestKind,
        outcome: &MutationOutcome,
    ) -> StoreResult<()> {
        if outcome.transaction_id.is_generated() {
            return Ok(());
        }
        self.conn.execute(
            "INSERT INTO processed_transactions (
                transaction_id,
                operation,
                outcome,
                resource_id,
                reporter_resource_id,
                representation_version,
                generation,
                common_version,
                tombstone
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                outcome.transaction_id.as_str(),
                request.as_str(),
                outcome.kind.as_str(),
                outcome.resource_id.to_string(),
                outcome.reporter_resource_id.to_string(),
                db_counter(outcome.representation_version)?,
                db_counter(outcome.generation)?,
                db_counter(outcome.common_version)?,
                bool_to_int(outcome.tombstone),
            ],
        )?;
        Ok(())
    }

    fn find_common_at(
        &self,
        resource_id: ResourceId,
        version: u64,
    ) -> StoreResult<Option<CommonRepresentation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COMMON_REPRESENTATION_SELECT_SQL}
             WHERE resource_id = ?1
               AND version = ?2;"
        ))?;
        let mut rows = stmt.query(params![resource_id.to_string(), db_counter(version)?])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_common_representation_row(row)?));
        }
        Ok(None)
    }
}

impl ResourceRepository for SqliteResourceRepository<'_> {
    fn next_resource_id(&self) -> StoreResult<ResourceId> {
        Ok(Uuid::now_v7())
    }

    fn next_reporter_resource_id(&self) -> StoreResult<ReporterResourceId> {
        Ok(Uuid::now_v7())
    }

    fn save(
        &self,
        change_set: &ChangeSet,
        operation: OperationType,
        transaction_id: &TransactionId,
    ) -> StoreResult<MutationOutcome> {
        change_set.validate()?;
        if change_set.kind.operation_type() != Some(operation) {
            return Err(StoreError::InvalidData(format!(
                "outcome `{}` cannot be saved as `{}`",
                change_set.kind.as_str(),
                operation.as_str()
            )));
        }
        if !change_set.is_consistent() {
            return Err(StoreError::InvalidData(format!(
                "inconsistent change set for {}",
                change_set.reporter_resource.key
            )));
        }

        match &change_set.resource {
            ResourceWrite::Append(resource) => self.insert_resource(resource)?,
            ResourceWrite::MarkTombstone(resource) => self.mark_resource_tombstone(resource)?,
            ResourceWrite::Keep(_) => {}
        }

        match change_set.pointer_write {
            PointerWrite::Insert => self.insert_reporter_resource(&change_set.reporter_resource)?,
            PointerWrite::Update => self.update_reporter_resource(&change_set.reporter_resource)?,
        }

        self.insert_reporter_representation(&change_set.reporter_representation)?;

        if let Some(common) = &change_set.common_representation {
            self.insert_common_representation(common)?;
        }

        let snapshot = &change_set.reporter_representation;
        let resource_data = match operation {
            OperationType::Deleted => None,
            OperationType::Created | OperationType::Updated => Some(snapshot.data.clone()),
        };
        let payload = ResourceEventPayload::new(
            operation,
            change_set.resource(),
            &change_set.reporter_resource,
            snapshot.reporter_version.clone(),
            resource_data,
        );
        let payload = serde_json::to_value(&payload).map_err(|err| {
            StoreError::InvalidData(format!("unserializable resource event: {err}"))
        })?;
        let event = OutboxEvent::new(
            AggregateType::Resources,
            change_set.resource().id,
            operation,
            transaction_id.as_str(),
            payload,
        );
        insert_outbox_event(self.conn, &event)?;

        let outcome = change_set.outcome(transaction_id);
        let request = match operation {
            OperationType::Deleted => RequestKind::Delete,
            OperationType::Created | OperationType::Updated => RequestKind::Report,
        };
        self.insert_ledger_entry(request, &outcome)?;

        Ok(outcome)
    }

    fn find_resource_by_keys(&self, key: &ReporterResourceKey) -> StoreResult<Resource> {
        let mut stmt = self.conn.prepare(
            "SELECT
                r.id AS id,
                r.common_version AS common_version,
                r.type AS type,
                r.ktn AS ktn,
                r.tombstone AS tombstone,
                r.created_at AS created_at,
                r.updated_at AS updated_at
             FROM reporter_resource rr
             JOIN resource r ON r.id = rr.resource_id
             WHERE rr.local_resource_id = ?1
               AND rr.reporter_type = ?2
               AND rr.resource_type = ?3
               AND rr.reporter_instance_id = ?4
             ORDER BY r.common_version DESC
             LIMIT 1;",
        )?;
        let mut rows = stmt.query(key_params(key))?;
        if let Some(row) = rows.next()? {
            return parse_resource_row(row);
        }
        Err(StoreError::not_found_for_key(key))
    }

    fn find_current_and_previous_versioned_representations(
        &self,
        key: &ReporterResourceKey,
        current_version: Option<u64>,
        operation: OperationType,
    ) -> StoreResult<(Option<Representations>, Option<Representations>)> {
        let resource = self.find_resource_by_keys(key)?;
        let version = current_version.unwrap_or(resource.common_version);

        let current = self.find_common_at(resource.id, version)?;
        let previous = match (operation, version.checked_sub(1)) {
            (OperationType::Created, _) | (_, None) => None,
            (_, Some(previous_version)) => self.find_common_at(resource.id, previous_version)?,
        };

        Ok((
            Representations::new(current, None),
            Representations::new(previous, None),
        ))
    }

    fn find_latest_representations(
        &self,
        key: &ReporterResourceKey,
    ) -> StoreResult<Representations> {
        let pointer = self
            .find_reporter_resource(key)?
            .ok_or_else(|| StoreError::not_found_for_key(key))?;
        let reporter = self.find_latest_reporter_representation(pointer.id)?;
        let common = self.find_current_common_representation(pointer.resource_id)?;
        Representations::new(common, reporter).ok_or_else(|| StoreError::not_found_for_key(key))
    }

    fn has_transaction_id_been_processed(&self, transaction_id: &str) -> StoreResult<bool> {
        if transaction_id.is_empty() {
            return Ok(false);
        }
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM processed_transactions
                WHERE transaction_id = ?1
            );",
            [transaction_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn find_reporter_resource(
        &self,
        key: &ReporterResourceKey,
    ) -> StoreResult<Option<ReporterResource>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REPORTER_RESOURCE_SELECT_SQL}
             WHERE {KEY_PREDICATE_SQL};"
        ))?;
        let mut rows = stmt.query(key_params(key))?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_reporter_resource_row(row)?));
        }
        Ok(None)
    }

    fn find_processed_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<ProcessedTransaction>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{LEDGER_SELECT_SQL} WHERE transaction_id = ?1;"))?;
        let entry = stmt
            .query_row([transaction_id], |row| Ok(parse_ledger_row(row)))
            .optional()?;
        entry.transpose()
    }

    fn find_live_reporter_resources(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Vec<ReporterResource>> {
        // Snapshot rowids grow with every insert, so the largest one marks
        // the reporter that reported most recently.
        let mut stmt = self.conn.prepare(&format!(
            "{REPORTER_RESOURCE_SELECT_SQL}
             WHERE resource_id = ?1
               AND tombstone = 0
             ORDER BY (
                SELECT MAX(rep.rowid)
                FROM reporter_representation rep
                WHERE rep.reporter_resource_id = rr.id
             ) DESC, id ASC;"
        ))?;
        let mut rows = stmt.query([resource_id.to_string()])?;
        let mut pointers = Vec::new();
        while let Some(row) = rows.next()? {
            pointers.push(parse_reporter_resource_row(row)?);
        }
        Ok(pointers)
    }

    fn find_current_resource(&self, resource_id: ResourceId) -> StoreResult<Option<Resource>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RESOURCE_SELECT_SQL}
             WHERE id = ?1
             ORDER BY common_version DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([resource_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_resource_row(row)?));
        }
        Ok(None)
    }

    fn find_current_common_representation(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Option<CommonRepresentation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COMMON_REPRESENTATION_SELECT_SQL}
             WHERE resource_id = ?1
             ORDER BY version DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([resource_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_common_representation_row(row)?));
        }
        Ok(None)
    }

    fn find_latest_reporter_representation(
        &self,
        reporter_resource_id: ReporterResourceId,
    ) -> StoreResult<Option<ReporterRepresentation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{REPORTER_REPRESENTATION_SELECT_SQL}
             WHERE reporter_resource_id = ?1
             ORDER BY generation DESC, version DESC
             LIMIT 1;"
        ))?;
        let mut rows = stmt.query([reporter_resource_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_reporter_representation_row(row)?));
        }
        Ok(None)
    }

    fn list_reporter_representations(
        &self,
        key: &ReporterResourceKey,
    ) -> StoreResult<Vec<ReporterRepresentation>> {
        let pointer = self
            .find_reporter_resource(key)?
            .ok_or_else(|| StoreError::not_found_for_key(key))?;
        let mut stmt = self.conn.prepare(&format!(
            "{REPORTER_REPRESENTATION_SELECT_SQL}
             WHERE reporter_resource_id = ?1
             ORDER BY generation ASC, version ASC;"
        ))?;
        let mut rows = stmt.query([pointer.id.to_string()])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(parse_reporter_representation_row(row)?);
        }
        Ok(snapshots)
    }

    fn list_common_representations(
        &self,
        resource_id: ResourceId,
    ) -> StoreResult<Vec<CommonRepresentation>> {
        let mut stmt = self.conn.prepare(&format!(
            "{COMMON_REPRESENTATION_SELECT_SQL}
             WHERE resource_id = ?1
             ORDER BY version ASC;"
        ))?;
        let mut rows = stmt.query([resource_id.to_string()])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(parse_common_representation_row(row)?);
        }
        Ok(versions)
    }

    fn update_consistency_token(&self, resource_id: ResourceId, token: &str) -> StoreResult<()> {
        let mut validator = FieldValidator::new();
        validator.max_len("consistency_token", token, MAX_CONSISTENCY_TOKEN_LEN);
        validator.finish()?;

        let changed = self.conn.execute(
            "UPDATE resource
             SET
                ktn = ?1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?2
               AND common_version = (
                SELECT MAX(common_version)
                FROM resource
                WHERE id = ?2
               );",
            params![token, resource_id.to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::ResourceNotFound(format!("resource {resource_id}")));
        }
        Ok(())
    }

    fn record_processed_transaction(
        &self,
        request: RequestKind,
        outcome: &MutationOutcome,
    ) -> StoreResult<()> {
        self.insert_ledger_entry(request, outcome)
    }

    fn append_outbox_event(&self, event: &OutboxEvent) -> StoreResult<()> {
        insert_outbox_event(self.conn, event)
    }
}

fn key_params(key: &ReporterResourceKey) -> [&str; 4] {
    [
        key.local_resource_id.as_str(),
        key.reporter_type.as_str(),
        key.resource_type.as_str(),
        key.reporter_instance_id.as_str(),
    ]
}

fn parse_resource_row(row: &Row<'_>) -> StoreResult<Resource> {
    let resource = Resource {
        id: parse_uuid(row, "id", "resource")?,
        resource_type: row.get("type")?,
        common_version: parse_counter(row, "common_version", "resource", MIN_COMMON_VERSION)?,
        consistency_token: row.get("ktn")?,
        tombstone: parse_bool(row, "tombstone", "resource")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    resource.validate()?;
    Ok(resource)
}

fn parse_reporter_resource_row(row: &Row<'_>) -> StoreResult<ReporterResource> {
    let pointer = ReporterResource {
        id: parse_uuid(row, "id", "reporter_resource")?,
        key: ReporterResourceKey {
            local_resource_id: row.get("local_resource_id")?,
            reporter_type: row.get("reporter_type")?,
            resource_type: row.get("resource_type")?,
            reporter_instance_id: row.get("reporter_instance_id")?,
        },
        resource_id: parse_uuid(row, "resource_id", "reporter_resource")?,
        api_href: row.get("api_href")?,
        console_href: row.get("console_href")?,
        representation_version: parse_counter(
            row,
            "representation_version",
            "reporter_resource",
            MIN_VERSION,
        )?,
        generation: parse_counter(row, "generation", "reporter_resource", MIN_GENERATION)?,
        tombstone: parse_bool(row, "tombstone", "reporter_resource")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    pointer.validate()?;
    Ok(pointer)
}

fn parse_reporter_representation_row(row: &Row<'_>) -> StoreResult<ReporterRepresentation> {
    let table = "reporter_representation";
    let snapshot = ReporterRepresentation {
        reporter_resource_id: parse_uuid(row, "reporter_resource_id", table)?,
        version: parse_counter(row, "version", table, MIN_VERSION)?,
        generation: parse_counter(row, "generation", table, MIN_GENERATION)?,
        data: parse_data(row, table)?,
        reporter_version: row.get("reporter_version")?,
        common_version: parse_counter(row, "common_version", table, MIN_COMMON_VERSION)?,
        transaction_id: row.get("transaction_id")?,
        tombstone: parse_bool(row, "tombstone", table)?,
        created_at: row.get("created_at")?,
    };
    snapshot.validate()?;
    Ok(snapshot)
}

fn parse_common_representation_row(row: &Row<'_>) -> StoreResult<CommonRepresentation> {
    let table = "common_representation";
    let common = CommonRepresentation {
        resource_id: parse_uuid(row, "resource_id", table)?,
        version: parse_counter(row, "version", table, MIN_VERSION)?,
        data: parse_data(row, table)?,
        reported_by_reporter_type: row.get("reported_by_reporter_type")?,
        reported_by_reporter_instance: row.get("reported_by_reporter_instance")?,
        transaction_id: row.get("transaction_id")?,
        created_at: row.get("created_at")?,
    };
    common.validate()?;
    Ok(common)
}

fn parse_ledger_row(row: &Row<'_>) -> StoreResult<ProcessedTransaction> {
    let table = "processed_transactions";
    let request_text: String = row.get("operation")?;
    let request = RequestKind::parse(&request_text).ok_or_else(|| {
        StoreError::InvalidData(format!(
            "invalid operation `{request_text}` in {table}.operation"
        ))
    })?;
    let outcome_text: String = row.get("outcome")?;
    let kind = OutcomeKind::parse(&outcome_text).ok_or_else(|| {
        StoreError::InvalidData(format!("invalid outcome `{outcome_text}` in {table}.outcome"))
    })?;
    let transaction_text: String = row.get("transaction_id")?;

    Ok(ProcessedTransaction {
        request,
        outcome: MutationOutcome {
            kind,
            transaction_id: TransactionId::parse(transaction_text)?,
            resource_id: parse_uuid(row, "resource_id", table)?,
            reporter_resource_id: parse_uuid(row, "reporter_resource_id", table)?,
            representation_version: parse_counter(
                row,
                "representation_version",
                table,
                MIN_VERSION,
            )?,
            generation: parse_counter(row, "generation", table, MIN_GENERATION)?,
            common_version: parse_counter(row, "common_version", table, MIN_COMMON_VERSION)?,
            tombstone: parse_bool(row, "tombstone", table)?,
            replayed: false,
        },
        created_at: row.get("created_at")?,
    })
}

fn parse_uuid(row: &Row<'_>, column: &str, table: &str) -> StoreResult<Uuid> {
    let text: String = row.get(column)?;
    Uuid::parse_str(&text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{text}` in {table}.{column}"))
    })
}

fn parse_bool(row: &Row<'_>, column: &str, table: &str) -> StoreResult<bool> {
    match row.get::<_, i64>(column)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(StoreError::InvalidData(format!(
            "invalid {column} value `{other}` in {table}.{column}"
        ))),
    }
}

fn parse_counter(row: &Row<'_>, column: &'static str, table: &str, min: i64) -> StoreResult<u64> {
    let raw: i64 = row.get(column)?;
    counter_from_db(column, raw, min)
        .map_err(|err| StoreError::InvalidData(format!("{err} in {table}.{column}")))
}

fn parse_data(row: &Row<'_>, table: &str) -> StoreResult<Representation> {
    let text: String = row.get("data")?;
    let value = serde_json::from_str(&text).map_err(|err| {
        StoreError::InvalidData(format!("invalid json in {table}.data: {err}"))
    })?;
    Representation::from_value(value)
        .map_err(|err| StoreError::InvalidData(format!("{err} in {table}.data")))
}

fn data_to_db(data: &Representation) -> StoreResult<String> {
    serde_json::to_string(data)
        .map_err(|err| StoreError::InvalidData(format!("unserializable representation: {err}")))
}

fn db_counter(value: u64) -> StoreResult<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("counter `{value}` exceeds storage range")))
}

fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

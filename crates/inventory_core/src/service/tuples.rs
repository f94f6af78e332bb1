//! Workspace relationship events derived from canonical state changes.
//!
//! # Invariants
//! - A tuple event is written only when the canonical `workspace_id` moves.
//! - It is written in the same transaction as the change that moved it.

use crate::error::{StoreError, StoreResult};
use crate::model::change_set::{ChangeSet, ResourceWrite};
use crate::model::event::{AggregateType, OperationType, OutboxEvent, WorkspaceTupleEventPayload};
use crate::model::outcome::TransactionId;
use crate::model::representation::{CommonRepresentation, Representations};
use crate::repo::ResourceRepository;
use serde_json::Value;

const WORKSPACE_KEY: &str = "workspace_id";

/// Appends a `kessel.tuples` event when `change_set` moved the resource
/// between workspaces. Returns whether an event was written.
pub(crate) fn append_workspace_tuple_event<R: ResourceRepository>(
    repo: &R,
    change_set: &ChangeSet,
    operation: OperationType,
    transaction_id: &TransactionId,
) -> StoreResult<bool> {
    let resource = change_set.resource();
    let (current, previous) = match &change_set.resource {
        ResourceWrite::Keep(_) => return Ok(false),
        ResourceWrite::MarkTombstone(_) => {
            let last = repo.find_current_common_representation(resource.id)?;
            (None, last.as_ref().and_then(common_workspace))
        }
        ResourceWrite::Append(_) => {
            let (current, previous) = repo.find_current_and_previous_versioned_representations(
                &change_set.reporter_resource.key,
                Some(resource.common_version),
                operation,
            )?;
            (workspace_of(current.as_ref()), workspace_of(previous.as_ref()))
        }
    };

    if current == previous {
        return Ok(false);
    }

    let tuple_operation = match (&current, &previous) {
        (Some(_), None) => OperationType::Created,
        (None, Some(_)) => OperationType::Deleted,
        _ => OperationType::Updated,
    };
    let payload = WorkspaceTupleEventPayload {
        resource_id: resource.id,
        resource_type: resource.resource_type.clone(),
        reporter_type: change_set.reporter_resource.key.reporter_type.clone(),
        current_workspace_id: current,
        previous_workspace_id: previous,
    };
    let payload = serde_json::to_value(&payload)
        .map_err(|err| StoreError::InvalidData(format!("unserializable tuple event: {err}")))?;
    repo.append_outbox_event(&OutboxEvent::new(
        AggregateType::Tuples,
        resource.id,
        tuple_operation,
        transaction_id.as_str(),
        payload,
    ))?;
    Ok(true)
}

fn workspace_of(pair: Option<&Representations>) -> Option<String> {
    pair.and_then(Representations::common)
        .and_then(common_workspace)
}

fn common_workspace(common: &CommonRepresentation) -> Option<String> {
    common
        .data
        .get(WORKSPACE_KEY)
        .and_then(Value::as_str)
        .filter(|workspace| !workspace.is_empty())
        .map(str::to_string)
}

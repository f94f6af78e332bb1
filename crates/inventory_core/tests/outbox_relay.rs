use inventory_core::service::collaborators::{
    CollaboratorError, Producer, RecordingProducer, SingleProducerEventer,
};
use inventory_core::service::relay::{OutboxRelay, RelayReport};
use inventory_core::store::outbox::SqliteEventSource;
use inventory_core::{
    AggregateType, DeleteRequest, EventSource, OperationContext, OperationType, OutboxEvent,
    ReportRequest, Representation, ReporterResourceKey, ResourceService, Store, StoreConfig,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const API_HREF: &str = "https://api.example.com/hosts/h1";

fn open_store(dir: &tempfile::TempDir) -> Store {
    Store::open(dir.path().join("inventory.db"), StoreConfig::default()).unwrap()
}

fn host_key() -> ReporterResourceKey {
    ReporterResourceKey::new("h1", "hbi", "host", "i1").unwrap()
}

fn request(payload: Value) -> ReportRequest {
    ReportRequest::new(
        host_key(),
        Representation::from_value(payload).unwrap(),
        API_HREF,
    )
}

#[test]
fn committed_events_are_published_and_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let producer = Arc::new(RecordingProducer::new());
    let service = ResourceService::new(store.clone()).with_eventer(
        Arc::new(SingleProducerEventer::new(producer.clone())),
        "inventory-test",
    );
    let ctx = OperationContext::new();

    service
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();
    service
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();
    service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap();

    let events = producer.events();
    let operations: Vec<OperationType> = events.iter().map(|event| event.operation).collect();
    assert_eq!(
        operations,
        vec![OperationType::Created, OperationType::Deleted]
    );
    assert_eq!(
        events[0].payload["type"],
        json!("redhat.inventory.resources.host.created")
    );
    assert_eq!(events[0].payload["resource_data"], json!({"hostname": "a"}));
    assert!(events[1].payload.get("resource_data").is_none());
    assert_eq!(store.event_source().pending_count().unwrap(), 0);
}

#[test]
fn failed_deliveries_stay_pending_until_drained() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let producer = Arc::new(RecordingProducer::new());
    producer.set_failing(true);
    let eventer = Arc::new(SingleProducerEventer::new(producer.clone()));
    let service =
        ResourceService::new(store.clone()).with_eventer(eventer.clone(), "inventory-test");
    let ctx = OperationContext::new();

    // The report itself succeeds even though delivery fails.
    service
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();
    assert_eq!(store.event_source().pending_count().unwrap(), 1);

    producer.set_failing(false);
    let relay = OutboxRelay::new(store.event_source(), eventer, "inventory-test");
    let report = relay.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.failed), (1, 0));
    assert_eq!(store.event_source().pending_count().unwrap(), 0);

    let again = relay.drain(&ctx, 10).unwrap();
    assert_eq!((again.delivered, again.failed), (0, 0));
    assert_eq!(producer.events().len(), 1);
}

#[test]
fn events_are_acknowledged_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let ctx = OperationContext::new();
    ResourceService::new(store.clone())
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();

    let source = store.event_source();
    let pending = source.pending(10).unwrap();
    assert_eq!(pending.len(), 1);
    assert!(source.acknowledge(pending[0].id).unwrap());
    assert!(!source.acknowledge(pending[0].id).unwrap());
    assert!(!source.get(pending[0].id).unwrap().unwrap().is_pending());
}

#[test]
fn workspace_moves_emit_tuple_events() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let service = ResourceService::new(store.clone());
    let ctx = OperationContext::new();

    let created = service
        .report(
            &ctx,
            &request(json!({"hostname": "a", "workspace_id": "ws-1"})),
        )
        .unwrap();
    service
        .report(
            &ctx,
            &request(json!({"hostname": "b", "workspace_id": "ws-1"})),
        )
        .unwrap();
    let moved = service
        .report(
            &ctx,
            &request(json!({"hostname": "b", "workspace_id": "ws-2"})),
        )
        .unwrap();

    let source = store.event_source();
    let created_tuples: Vec<_> = source
        .pending_for_transaction(created.transaction_id.as_str())
        .unwrap()
        .into_iter()
        .filter(|event| event.aggregate_type == AggregateType::Tuples)
        .collect();
    assert_eq!(created_tuples.len(), 1);
    assert_eq!(created_tuples[0].operation, OperationType::Created);

    let moved_tuples: Vec<_> = source
        .pending_for_transaction(moved.transaction_id.as_str())
        .unwrap()
        .into_iter()
        .filter(|event| event.aggregate_type == AggregateType::Tuples)
        .collect();
    assert_eq!(moved_tuples.len(), 1);
    assert_eq!(moved_tuples[0].operation, OperationType::Updated);
    assert_eq!(moved_tuples[0].payload["current_workspace_id"], json!("ws-2"));
    assert_eq!(
        moved_tuples[0].payload["previous_workspace_id"],
        json!("ws-1")
    );

    let tuple_total = source
        .pending(100)
        .unwrap()
        .into_iter()
        .filter(|event| event.aggregate_type == AggregateType::Tuples)
        .count();
    assert_eq!(tuple_total, 2);
}

#[test]
fn concurrent_relays_deliver_each_event_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let ctx = OperationContext::new();
    ResourceService::new(store.clone())
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();

    let recorder = Arc::new(RecordingProducer::new());
    let rival = relay_to(&store, recorder.clone(), "inventory-rival");
    let racing = Arc::new(RacingProducer::new(recorder.clone(), rival));
    let relay = relay_to(&store, racing.clone(), "inventory-test");
    assert_ne!(relay.claimant(), "inventory-test");

    let report = relay.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.failed, report.skipped), (1, 0, 0));
    let rival_report = racing.rival_report().unwrap();
    assert_eq!(
        (rival_report.delivered, rival_report.failed, rival_report.skipped),
        (0, 0, 1)
    );
    assert_eq!(recorder.events().len(), 1);
    assert_eq!(store.event_source().pending_count().unwrap(), 0);
}

#[test]
fn failed_delivery_releases_the_claim_for_other_relays() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let ctx = OperationContext::new();
    ResourceService::new(store.clone())
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();

    let broken = Arc::new(RecordingProducer::new());
    broken.set_failing(true);
    let first = relay_to(&store, broken, "inventory-a");
    let report = first.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.failed), (0, 1));

    let working = Arc::new(RecordingProducer::new());
    let second = relay_to(&store, working.clone(), "inventory-b");
    let report = second.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.skipped), (1, 0));
    assert_eq!(working.events().len(), 1);

    let again = first.drain(&ctx, 10).unwrap();
    assert_eq!(again, RelayReport::default());
}

#[test]
fn expired_claims_are_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let ctx = OperationContext::new();
    ResourceService::new(store.clone())
        .report(&ctx, &request(json!({"hostname": "a"})))
        .unwrap();

    let source = store.event_source();
    let event = source.pending(10).unwrap().remove(0);
    assert!(source
        .claim(event.id, "crashed-relay", Duration::from_secs(60))
        .unwrap());

    let producer = Arc::new(RecordingProducer::new());
    let blocked = relay_to(&store, producer.clone(), "inventory-test");
    let report = blocked.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.skipped), (0, 1));
    assert!(producer.events().is_empty());

    std::thread::sleep(Duration::from_millis(20));
    let takeover = relay_to(&store, producer.clone(), "inventory-test")
        .with_claim_lease(Duration::from_millis(5));
    let report = takeover.drain(&ctx, 10).unwrap();
    assert_eq!((report.delivered, report.skipped), (1, 0));
    assert_eq!(producer.events().len(), 1);
    assert!(!source.get(event.id).unwrap().unwrap().is_pending());
}

use inventory_core::service::schema::{SchemaRegistry, SchemaRule};
use inventory_core::{
    DeleteRequest, ErrorKind, OperationContext, OutcomeKind, ReportRequest, Representation,
    ReporterResourceKey, ResourceService, Store, StoreConfig,
};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

const API_HREF: &str = "https://api.example.com/hosts/h1";

fn open_service() -> (tempfile::TempDir, ResourceService) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("inventory.db"), StoreConfig::default()).unwrap();
    (dir, ResourceService::new(store))
}

fn host_key() -> ReporterResourceKey {
    ReporterResourceKey::new("h1", "hbi", "host", "i1").unwrap()
}

fn data(value: Value) -> Representation {
    Representation::from_value(value).unwrap()
}

fn report(service: &ResourceService, payload: Value) -> inventory_core::MutationOutcome {
    let request = ReportRequest::new(host_key(), data(payload), API_HREF);
    service.report(&OperationContext::new(), &request).unwrap()
}

fn count(service: &ResourceService, sql: &str) -> i64 {
    let conn = Connection::open(service.store().path()).unwrap();
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn end_to_end_report_update_delete_revive() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();

    // 1. First report creates everything.
    let created = report(&service, json!({"hostname": "a"}));
    assert_eq!(created.kind, OutcomeKind::Created);
    assert_eq!(created.generation, 0);
    assert_eq!(created.representation_version, 1);
    assert_eq!(created.common_version, 1);

    // 2. Identical payload writes no snapshot.
    let unchanged = report(&service, json!({"hostname": "a"}));
    assert_eq!(unchanged.kind, OutcomeKind::Unchanged);
    assert_eq!(unchanged.representation_version, 1);
    assert_eq!(
        count(&service, "SELECT COUNT(*) FROM reporter_representation;"),
        1
    );

    // 3. Changed payload bumps the version.
    let updated = report(&service, json!({"hostname": "b"}));
    assert_eq!(updated.kind, OutcomeKind::Updated);
    assert_eq!(updated.representation_version, 2);
    assert_eq!(updated.common_version, 2);
    assert_eq!(
        count(&service, "SELECT COUNT(*) FROM reporter_representation;"),
        2
    );

    // 4. Delete appends a tombstoned snapshot.
    let deleted = service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap();
    assert_eq!(deleted.kind, OutcomeKind::Deleted);
    assert!(deleted.tombstone);
    assert_eq!(deleted.representation_version, 3);
    let history = service.history(&ctx, &host_key()).unwrap();
    assert!(history.resource.tombstone);
    assert!(history.reporter_resource.tombstone);

    // 5. Reporting again revives under a new generation.
    let revived = report(&service, json!({"hostname": "c"}));
    assert_eq!(revived.kind, OutcomeKind::Revived);
    assert_eq!(revived.generation, 1);
    assert_eq!(revived.representation_version, 1);
    assert!(!revived.tombstone);

    let history = service.history(&ctx, &host_key()).unwrap();
    assert!(!history.resource.tombstone);
    assert_eq!(history.resource.id, created.resource_id);
    let pairs: Vec<(u64, u64, bool)> = history
        .reporter_representations
        .iter()
        .map(|snapshot| (snapshot.generation, snapshot.version, snapshot.tombstone))
        .collect();
    assert_eq!(
        pairs,
        vec![(0, 1, false), (0, 2, false), (0, 3, true), (1, 1, false)]
    );
    let common_versions: Vec<u64> = history
        .common_representations
        .iter()
        .map(|common| common.version)
        .collect();
    assert_eq!(common_versions, vec![1, 2, 3]);
}

#[test]
fn versions_never_go_backwards() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();

    for round in 0..3 {
        report(&service, json!({"hostname": format!("a{round}")}));
        report(&service, json!({"hostname": format!("b{round}")}));
        service
            .delete(&ctx, &DeleteRequest::new(host_key()))
            .unwrap();
    }

    let history = service.history(&ctx, &host_key()).unwrap();
    let pairs: Vec<(u64, u64)> = history
        .reporter_representations
        .iter()
        .map(|snapshot| (snapshot.generation, snapshot.version))
        .collect();
    for window in pairs.windows(2) {
        let (previous, next) = (window[0], window[1]);
        assert!(next > previous, "{next:?} must follow {previous:?}");
        if next.0 > previous.0 {
            assert_eq!(next.1, 1, "version restarts with a new generation");
        }
    }
    assert_eq!(pairs.last(), Some(&(2, 3)));
}

#[test]
fn key_lookup_is_case_insensitive() {
    let (_dir, service) = open_service();
    report(&service, json!({"hostname": "a"}));

    let upper = ReporterResourceKey::new("H1", "HBI", "Host", "I1").unwrap();
    let request = ReportRequest::new(upper, data(json!({"hostname": "a"})), API_HREF);
    let outcome = service
        .report(&OperationContext::new(), &request)
        .unwrap();
    assert_eq!(outcome.kind, OutcomeKind::Unchanged);
    assert_eq!(count(&service, "SELECT COUNT(*) FROM reporter_resource;"), 1);
}

#[test]
fn delete_of_unknown_key_is_not_found() {
    let (_dir, service) = open_service();
    let error = service
        .delete(&OperationContext::new(), &DeleteRequest::new(host_key()))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotFound);
}

#[test]
fn second_delete_is_a_noop_without_events() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();
    report(&service, json!({"hostname": "a"}));
    service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap();
    let events_after_first = count(&service, "SELECT COUNT(*) FROM outbox_events;");

    let again = service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap();
    assert_eq!(again.kind, OutcomeKind::AlreadyDeleted);
    assert_eq!(again.representation_version, 2);
    assert_eq!(
        count(&service, "SELECT COUNT(*) FROM outbox_events;"),
        events_after_first
    );
}

#[test]
fn strict_create_conflicts_with_live_key() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();
    let request = ReportRequest::new(host_key(), data(json!({"hostname": "a"})), API_HREF);

    service.create(&ctx, &request).unwrap();
    let error = service.create(&ctx, &request).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::AlreadyExists);

    service
        .delete(&ctx, &DeleteRequest::new(host_key()))
        .unwrap();
    let revived = service.create(&ctx, &request).unwrap();
    assert_eq!(revived.kind, OutcomeKind::Revived);
}

#[test]
fn inventory_id_must_match_the_stored_resource() {
    let (_dir, service) = open_service();
    report(&service, json!({"hostname": "a"}));

    let request = ReportRequest::new(host_key(), data(json!({"hostname": "b"})), API_HREF)
        .with_inventory_id(Uuid::now_v7());
    let error = service
        .report(&OperationContext::new(), &request)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ConsistencyMismatch);
    assert_eq!(
        count(&service, "SELECT COUNT(*) FROM reporter_representation;"),
        1
    );
}

#[test]
fn second_reporter_attaches_through_inventory_id() {
    let (_dir, service) = open_service();
    let ctx = OperationContext::new();
    let created = report(&service, json!({"hostname": "a"}));

    let acm = ReporterResourceKey::new("cluster-7", "acm", "host", "acm-1").unwrap();
    let request = ReportRequest::new(acm.clone(), data(json!({"hostname": "a"})), API_HREF)
        .with_inventory_id(created.resource_id);
    let attached = service.report(&ctx, &request).unwrap();

    assert_eq!(attached.kind, OutcomeKind::Created);
    assert_eq!(attached.resource_id, created.resource_id);
    // Same canonical data, so no new canonical version.
    assert_eq!(attached.common_version, 1);
    let latest = service.latest(&ctx, &acm).unwrap();
    assert_eq!(latest.common_version(), Some(1));
    assert_eq!(latest.reporter_version(), Some((0, 1)));
}

#[test]
fn inventory_id_of_another_resource_type_is_a_validation_error() {
    let (_dir, service) = open_service();
    let created = report(&service, json!({"hostname": "a"}));

    let cluster = ReporterResourceKey::new("c1", "acm", "k8s_cluster", "acm-1").unwrap();
    let request = ReportRequest::new(cluster, data(json!({"name": "c1"})), API_HREF)
        .with_inventory_id(created.resource_id);
    let error = service
        .report(&OperationContext::new(), &request)
        .unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Validation);
    let message = error.to_string();
    assert!(message.starts_with("inventory_id"));
    assert!(message.contains("k8s_cluster"));
    assert_eq!(count(&service, "SELECT COUNT(*) FROM reporter_resource;"), 1);
}

#[test]
fn registered_schema_gates_reports() {
    let (_dir, service) = open_service();
    let registry = SchemaRegistry::default();
    registry.register(
        "host",
        Some("hbi"),
        SchemaRule::compile(json!({
            "type": "object",
            "properties": {"hostname": {"type": "string"}},
            "required": ["hostname"]
        }))
        .unwrap(),
    );
    let service = service.with_schema_validator(Arc::new(registry));
    let ctx = OperationContext::new();

    let wrong_type = ReportRequest::new(host_key(), data(json!({"hostname": 7})), API_HREF);
    let error = service.report(&ctx, &wrong_type).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(error.to_string().contains("data/hostname"));

    let empty = ReportRequest::new(host_key(), Representation::default(), API_HREF);
    let error = service.report(&ctx, &empty).unwrap_err();
    assert!(error.to_string().contains("cannot be empty"));
    assert_eq!(count(&service, "SELECT COUNT(*) FROM resource;"), 0);

    let created = report(&service, json!({"hostname": "a"}));
    assert_eq!(created.kind, OutcomeKind::Created);
}

#[test]
fn validation_failures_write_nothing() {
    let (_dir, service) = open_service();
    let mut request = ReportRequest::new(host_key(), data(json!({"hostname": "a"})), "nope");
    request.key.reporter_instance_id = String::new();

    let error = service
        .report(&OperationContext::new(), &request)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    let message = error.to_string();
    assert!(message.contains("reporter_instance_id"));
    assert!(message.contains("api_href"));
    assert_eq!(count(&service, "SELECT COUNT(*) FROM resource;"), 0);
}

#[test]
fn empty_payload_is_rejected_by_default_schema() {
    let (_dir, service) = open_service();
    let request = ReportRequest::new(host_key(), Representation::default(), API_HREF);
    let error = service
        .report(&OperationContext::new(), &request)
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
    assert!(error.to_string().contains("schema validation failed"));
}

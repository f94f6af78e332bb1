use inventory_core::{
    AuthorityPolicy, DeleteRequest, MutationOutcome, OperationContext, OutcomeKind, ReportRequest,
    Representation, ReporterResourceKey, ResourceService, Store, StoreConfig,
};
use serde_json::{json, Value};
use uuid::Uuid;

const API_HREF: &str = "https://api.example.com/hosts/h1";

fn open_service(policy: AuthorityPolicy) -> (tempfile::TempDir, ResourceService) {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        authority_policy: policy,
        ..StoreConfig::default()
    };
    let store = Store::open(dir.path().join("inventory.db"), config).unwrap();
    (dir, ResourceService::new(store))
}

fn hbi_key() -> ReporterResourceKey {
    ReporterResourceKey::new("h1", "hbi", "host", "hbi-1").unwrap()
}

fn acm_key() -> ReporterResourceKey {
    ReporterResourceKey::new("cluster-7", "acm", "host", "acm-1").unwrap()
}

fn report(
    service: &ResourceService,
    key: ReporterResourceKey,
    payload: Value,
    inventory_id: Option<Uuid>,
) -> MutationOutcome {
    let mut request =
        ReportRequest::new(key, Representation::from_value(payload).unwrap(), API_HREF);
    if let Some(id) = inventory_id {
        request = request.with_inventory_id(id);
    }
    service.report(&OperationContext::new(), &request).unwrap()
}

fn canonical(service: &ResourceService, key: &ReporterResourceKey) -> (u64, Value, String) {
    let latest = service.latest(&OperationContext::new(), key).unwrap();
    let common = latest.common().unwrap();
    (
        common.version,
        common.data.to_value(),
        common.reported_by_reporter_type.clone(),
    )
}

#[test]
fn lower_priority_reporter_cannot_replace_canonical_state() {
    let (_dir, service) = open_service(AuthorityPolicy::Priority(vec![
        "hbi".to_string(),
        "acm".to_string(),
    ]));
    let created = report(&service, hbi_key(), json!({"hostname": "a"}), None);

    let attached = report(
        &service,
        acm_key(),
        json!({"hostname": "z"}),
        Some(created.resource_id),
    );
    assert_eq!(attached.kind, OutcomeKind::Created);
    assert_eq!(attached.common_version, 1);

    let updated = report(&service, acm_key(), json!({"hostname": "y"}), None);
    assert_eq!(updated.kind, OutcomeKind::Updated);
    assert_eq!(updated.representation_version, 2);

    assert_eq!(
        canonical(&service, &hbi_key()),
        (1, json!({"hostname": "a"}), "hbi".to_string())
    );
}

#[test]
fn higher_priority_reporter_takes_over_canonical_state() {
    let (_dir, service) = open_service(AuthorityPolicy::Priority(vec![
        "hbi".to_string(),
        "acm".to_string(),
    ]));
    let created = report(&service, acm_key(), json!({"hostname": "z"}), None);
    let attached = report(
        &service,
        hbi_key(),
        json!({"hostname": "a"}),
        Some(created.resource_id),
    );

    assert_eq!(attached.common_version, 2);
    assert_eq!(
        canonical(&service, &acm_key()),
        (2, json!({"hostname": "a"}), "hbi".to_string())
    );
}

#[test]
fn deleting_the_authority_falls_back_to_a_live_reporter() {
    let (_dir, service) = open_service(AuthorityPolicy::Priority(vec![
        "hbi".to_string(),
        "acm".to_string(),
    ]));
    let ctx = OperationContext::new();
    let created = report(&service, hbi_key(), json!({"hostname": "a"}), None);
    report(
        &service,
        acm_key(),
        json!({"hostname": "y"}),
        Some(created.resource_id),
    );

    let deleted = service.delete(&ctx, &DeleteRequest::new(hbi_key())).unwrap();
    assert_eq!(deleted.kind, OutcomeKind::Deleted);
    assert_eq!(deleted.common_version, 2);

    assert_eq!(
        canonical(&service, &acm_key()),
        (2, json!({"hostname": "y"}), "acm".to_string())
    );
    let history = service.history(&ctx, &acm_key()).unwrap();
    assert!(!history.resource.tombstone);
    assert!(!history.reporter_resource.tombstone);
}

#[test]
fn deleting_a_non_authority_keeps_canonical_state() {
    let (_dir, service) = open_service(AuthorityPolicy::LatestReporter);
    let ctx = OperationContext::new();
    let created = report(&service, hbi_key(), json!({"hostname": "a"}), None);
    report(
        &service,
        acm_key(),
        json!({"hostname": "a"}),
        Some(created.resource_id),
    );

    let deleted = service.delete(&ctx, &DeleteRequest::new(acm_key())).unwrap();
    assert_eq!(deleted.kind, OutcomeKind::Deleted);
    assert_eq!(deleted.common_version, 1);

    assert_eq!(
        canonical(&service, &hbi_key()),
        (1, json!({"hostname": "a"}), "hbi".to_string())
    );
    let history = service.history(&ctx, &hbi_key()).unwrap();
    assert!(!history.resource.tombstone);
}

#[test]
fn deleting_the_last_live_reporter_tombstones_the_resource() {
    let (_dir, service) = open_service(AuthorityPolicy::LatestReporter);
    let ctx = OperationContext::new();
    let created = report(&service, hbi_key(), json!({"hostname": "a"}), None);
    report(
        &service,
        acm_key(),
        json!({"hostname": "a"}),
        Some(created.resource_id),
    );

    service.delete(&ctx, &DeleteRequest::new(acm_key())).unwrap();
    let last = service.delete(&ctx, &DeleteRequest::new(hbi_key())).unwrap();
    assert!(last.tombstone);

    let history = service.history(&ctx, &hbi_key()).unwrap();
    assert!(history.resource.tombstone);
    assert_eq!(history.resource.common_version, 1);
}

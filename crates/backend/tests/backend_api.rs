use std::sync::Arc;

use chrono::{NaiveDate, TimeZone, Utc};

use billnotify_backend::{
    BackendClient, BackendConfig, BackendError, BackendRequest, CustomerDirectory, Credentials,
    DeliveryRecorder, PendingWorkResolver, RecordOutcome,
};
use billnotify_core::{CustomerId, Destination, DocumentId};
use billnotify_invoicing::DeliveryStatus;
use billnotify_testkit::{MockBackend, customer_json, document_json};

const USER: &str = "notifier";
const PASS: &str = "s3cret";

fn config(base_url: &str, password: &str) -> BackendConfig {
    BackendConfig::new(
        base_url,
        Credentials {
            username: USER.to_string(),
            password: password.to_string(),
        },
    )
}

async fn connected(srv: &MockBackend) -> Arc<BackendClient> {
    Arc::new(BackendClient::connect(config(&srv.base_url, PASS)).await.unwrap())
}

fn floor() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

fn dest() -> Destination {
    Destination::parse("5215512345678@c.us").unwrap()
}

#[tokio::test]
async fn bad_credentials_fail_with_auth_error() {
    let srv = MockBackend::spawn(USER, PASS).await;
    let err = BackendClient::connect(config(&srv.base_url, "wrong")).await.unwrap_err();
    assert!(matches!(err, BackendError::Auth(_)));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn unreachable_host_fails_with_auth_error() {
    let err = BackendClient::connect(config("http://127.0.0.1:1", PASS)).await.unwrap_err();
    assert!(matches!(err, BackendError::Auth(msg) if msg.contains("unreachable")));
}

#[tokio::test]
async fn single_401_reauthenticates_once_and_retries() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(1, "A-1", 10, "2024-02-01"));
    let client = connected(&srv).await;
    assert_eq!(srv.login_calls(), 1);

    srv.expire_sessions();
    let rows: Vec<serde_json::Value> = client
        .get_json(&BackendRequest::get("/documents"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(srv.login_calls(), 2);

    let log: Vec<_> = srv
        .request_log()
        .into_iter()
        .filter(|e| e.path == "/documents")
        .collect();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].status, 401);
    assert_eq!(log[1].status, 200);
    assert_ne!(log[0].token, log[1].token, "stale token must not be reused");

    // Next call keeps using the fresh session without logging in again.
    client.request(&BackendRequest::get("/documents")).await.unwrap();
    assert_eq!(srv.login_calls(), 2);
}

#[tokio::test]
async fn second_consecutive_401_is_a_session_error() {
    let srv = MockBackend::spawn(USER, PASS).await;
    let client = connected(&srv).await;

    srv.reject_next_requests(2);
    let err = client.request(&BackendRequest::get("/documents")).await.unwrap_err();
    assert_eq!(err, BackendError::Session);
    assert!(err.aborts_tick());

    // Exactly one reauthentication and two attempts; no loop.
    assert_eq!(srv.login_calls(), 2);
    let attempts = srv.request_log().iter().filter(|e| e.path == "/documents").count();
    assert_eq!(attempts, 2);
}

#[tokio::test]
async fn timeout_after_login_is_a_transport_error() {
    let srv = MockBackend::spawn(USER, PASS).await;
    let cfg = config(&srv.base_url, PASS).with_timeout(std::time::Duration::from_millis(100));
    let client = BackendClient::connect(cfg).await.unwrap();
    srv.stall_listings(std::time::Duration::from_millis(500));

    let err = client.request(&BackendRequest::get("/documents")).await.unwrap_err();
    assert!(matches!(err, BackendError::Transport(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn pending_respects_status_filter_floor_and_limit() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(1, "A-1", 10, "2023-12-31"));
    srv.insert_document(document_json(2, "A-2", 10, "2024-01-01"));
    let mut sent = document_json(3, "A-3", 10, "2024-01-05");
    sent["delivery_status"] = "sent".into();
    srv.insert_document(sent);
    let mut legacy = document_json(4, "A-4", 10, "2024-01-06");
    legacy["delivery_status"] = "unset".into();
    srv.insert_document(legacy);
    let mut skipped = document_json(5, "A-5", 10, "2024-01-07");
    skipped["delivery_status"] = "skipped".into();
    srv.insert_document(skipped);
    srv.insert_document(document_json(6, "A-6", 10, "2024-02-01"));

    let resolver = PendingWorkResolver::new(connected(&srv).await, 50);
    let docs = resolver.list_pending(floor(), 10).collect_all().await.unwrap();
    let ids: Vec<i64> = docs.iter().map(|d| d.id.get()).collect();
    assert_eq!(ids, vec![2, 4, 6]);
    assert!(docs.iter().all(|d| d.status() == DeliveryStatus::Unset));

    let limited = resolver.list_pending(floor(), 2).collect_all().await.unwrap();
    assert_eq!(limited.len(), 2);
}

#[tokio::test]
async fn legacy_flags_are_listed_and_recorded_like_unset() {
    let srv = MockBackend::spawn(USER, PASS).await;
    let mut legacy_no = document_json(1, "B-1", 10, "2024-02-01");
    legacy_no["delivery_status"] = "N".into();
    srv.insert_document(legacy_no);
    let mut blank = document_json(2, "B-2", 10, "2024-02-01");
    blank["delivery_status"] = "".into();
    srv.insert_document(blank);
    let mut legacy_yes = document_json(3, "B-3", 10, "2024-02-01");
    legacy_yes["delivery_status"] = "Y".into();
    srv.insert_document(legacy_yes);

    let client = connected(&srv).await;
    let resolver = PendingWorkResolver::new(client.clone(), 50);
    let docs = resolver.list_pending(floor(), 10).collect_all().await.unwrap();
    let ids: Vec<i64> = docs.iter().map(|d| d.id.get()).collect();
    assert_eq!(ids, vec![1, 2]);

    let recorder = DeliveryRecorder::new(client);
    let outcome = recorder
        .mark_sent(DocumentId::new(1), &dest(), Utc::now())
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Recorded);
    assert_eq!(srv.document(1).unwrap()["delivery_status"], "sent");
}

#[tokio::test]
async fn pending_pages_with_keyset_and_survives_concurrent_writes() {
    let srv = MockBackend::spawn(USER, PASS).await;
    for id in 1..=5 {
        srv.insert_document(document_json(id, &format!("B-{id}"), 10, "2024-03-01"));
    }
    let client = connected(&srv).await;
    let resolver = PendingWorkResolver::new(client.clone(), 2);
    let recorder = DeliveryRecorder::new(client);

    let mut cursor = resolver.list_pending(floor(), 100);
    let mut seen = Vec::new();
    while let Some(doc) = cursor.next().await.unwrap() {
        // Marking documents while iterating must not make later ones disappear.
        recorder.mark_sent(doc.id, &dest(), Utc::now()).await.unwrap();
        seen.push(doc.id.get());
    }
    assert_eq!(seen, vec![1, 2, 3, 4, 5]);

    // Restartable: a fresh listing sees nothing left.
    assert!(resolver.list_pending(floor(), 100).collect_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn excluded_documents_do_not_use_up_the_limit() {
    let srv = MockBackend::spawn(USER, PASS).await;
    for id in 1..=4 {
        srv.insert_document(document_json(id, &format!("B-{id}"), 10, "2024-03-01"));
    }
    let resolver = PendingWorkResolver::new(connected(&srv).await, 1);

    let docs = resolver
        .list_pending(floor(), 2)
        .excluding([DocumentId::new(1), DocumentId::new(2)])
        .collect_all()
        .await
        .unwrap();
    let ids: Vec<i64> = docs.iter().map(|d| d.id.get()).collect();
    assert_eq!(ids, vec![3, 4]);
}

#[tokio::test]
async fn invalid_records_are_skipped_not_fatal() {
    let srv = MockBackend::spawn(USER, PASS).await;
    let mut broken = document_json(1, "A-1", 10, "2024-02-01");
    broken["customer_id"] = serde_json::Value::Null;
    srv.insert_document(broken);
    srv.insert_document(document_json(2, "A-2", 10, "2024-02-01"));

    let resolver = PendingWorkResolver::new(connected(&srv).await, 1);
    let docs = resolver.list_pending(floor(), 10).collect_all().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, DocumentId::new(2));
}

#[tokio::test]
async fn mark_sent_is_idempotent() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(7, "B-7", 10, "2024-02-01"));
    let recorder = DeliveryRecorder::new(connected(&srv).await);
    let at = Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap();

    let first = recorder.mark_sent(DocumentId::new(7), &dest(), at).await.unwrap();
    let after_first = srv.document(7).unwrap();
    let second = recorder.mark_sent(DocumentId::new(7), &dest(), at).await.unwrap();
    let after_second = srv.document(7).unwrap();

    assert_eq!(first, RecordOutcome::Recorded);
    assert_eq!(second, RecordOutcome::AlreadyRecorded);
    assert_eq!(after_first, after_second);
    assert_eq!(after_second["delivery_status"], "sent");
    assert_eq!(after_second["delivery_destination"], "5215512345678@c.us");
}

#[tokio::test]
async fn skipped_is_distinct_and_never_overwritten_by_sent() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(8, "B-8", 10, "2024-02-01"));
    let recorder = DeliveryRecorder::new(connected(&srv).await);
    let id = DocumentId::new(8);

    assert_eq!(
        recorder.mark_skipped(id, "no mobile on file").await.unwrap(),
        RecordOutcome::Recorded
    );
    assert_eq!(
        recorder.mark_skipped(id, "no mobile on file").await.unwrap(),
        RecordOutcome::AlreadyRecorded
    );

    let err = recorder.mark_sent(id, &dest(), Utc::now()).await.unwrap_err();
    assert!(matches!(err, BackendError::Conflict(_)));

    let row = srv.document(8).unwrap();
    assert_eq!(row["delivery_status"], "skipped");
    assert_eq!(row["delivery_note"], "no mobile on file");
    assert!(row["delivery_destination"].is_null());
}

#[tokio::test]
async fn sent_to_a_different_destination_is_a_conflict() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(9, "B-9", 10, "2024-02-01"));
    let recorder = DeliveryRecorder::new(connected(&srv).await);
    let id = DocumentId::new(9);

    recorder.mark_sent(id, &dest(), Utc::now()).await.unwrap();
    let other = Destination::parse("15550001111@c.us").unwrap();
    assert!(matches!(
        recorder.mark_sent(id, &other, Utc::now()).await,
        Err(BackendError::Conflict(_))
    ));
}

#[tokio::test]
async fn failed_write_back_surfaces_status_error() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_document(document_json(11, "B-11", 10, "2024-02-01"));
    srv.fail_patches_for(11);
    let recorder = DeliveryRecorder::new(connected(&srv).await);

    let err = recorder
        .mark_sent(DocumentId::new(11), &dest(), Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 500, .. }));
    assert!(srv.document(11).unwrap()["delivery_status"].is_null());
}

#[tokio::test]
async fn customer_lookup_validates_and_reports_missing() {
    let srv = MockBackend::spawn(USER, PASS).await;
    srv.insert_customer(customer_json(10, "Ferreteria Lopez", Some("5512345678")));
    let directory = CustomerDirectory::new(connected(&srv).await);

    let customer = directory.fetch(CustomerId::new(10)).await.unwrap();
    assert_eq!(customer.display_name, "Ferreteria Lopez");
    assert_eq!(customer.contact.mobile(), Some("5512345678"));

    let err = directory.fetch(CustomerId::new(99)).await.unwrap_err();
    assert!(matches!(err, BackendError::NotFound(_)));
}

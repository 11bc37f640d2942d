//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::AggregateId;
use domain::{AggregateConfig, BankAccount};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use server::routes::accounts::AppState;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<AppState<InMemoryEventStore>>) {
    let state = server::create_state(InMemoryEventStore::new(), AggregateConfig::default());
    let app = server::create_app(state.clone(), metrics_handle());
    (app, state)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn health_check() {
    let (app, _) = setup();

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn open_deposit_withdraw_and_read_back() {
    let (app, _) = setup();

    let (status, body) = send(&app, "POST", "/accounts/acc-1/open", Some(json!({ "owner": "Ada" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);
    assert_eq!(body["events"], json!(["AccountOpened"]));

    let (status, body) =
        send(&app, "POST", "/accounts/acc-1/deposit", Some(json!({ "amount": 100 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 2);

    let (status, _) =
        send(&app, "POST", "/accounts/acc-1/withdraw", Some(json!({ "amount": 30 }))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", "/accounts/acc-1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["owner"], "Ada");
    assert_eq!(body["status"], "Open");
    assert_eq!(body["balance"], 70);
    assert_eq!(body["transactions"], 2);
    assert_eq!(body["version"], 3);
}

#[tokio::test]
async fn unknown_account_is_not_found() {
    let (app, _) = setup();

    let (status, body) = send(&app, "GET", "/accounts/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nobody"));

    let (status, _) =
        send(&app, "POST", "/accounts/nobody/deposit", Some(json!({ "amount": 5 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reading_unknown_account_starts_no_process() {
    let (app, state) = setup();

    let (status, _) = send(&app, "GET", "/accounts/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stopped = state
        .accounts
        .stop_aggregate::<BankAccount>(&AggregateId::from("ghost"))
        .await
        .unwrap();
    assert!(!stopped);
}

#[tokio::test]
async fn deposit_overflowing_balance_is_conflict() {
    let (app, _) = setup();
    send(&app, "POST", "/accounts/rich/open", Some(json!({ "owner": "alice" }))).await;
    let (status, _) = send(
        &app,
        "POST",
        "/accounts/rich/deposit",
        Some(json!({ "amount": u64::MAX })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        send(&app, "POST", "/accounts/rich/deposit", Some(json!({ "amount": 1 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("overflow"));
}

#[tokio::test]
async fn rejected_commands_map_to_client_errors() {
    let (app, _) = setup();
    send(&app, "POST", "/accounts/acc-2/open", Some(json!({ "owner": "Grace" }))).await;

    let (status, _) = send(&app, "POST", "/accounts/acc-2/open", Some(json!({ "owner": "Grace" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) =
        send(&app, "POST", "/accounts/acc-2/deposit", Some(json!({ "amount": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) =
        send(&app, "POST", "/accounts/acc-2/withdraw", Some(json!({ "amount": 10 }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("Insufficient funds"));

    let (_, body) = send(&app, "GET", "/accounts/acc-2", None).await;
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn close_requires_empty_balance() {
    let (app, _) = setup();
    send(&app, "POST", "/accounts/acc-3/open", Some(json!({ "owner": "Lin" }))).await;
    send(&app, "POST", "/accounts/acc-3/deposit", Some(json!({ "amount": 10 }))).await;

    let (status, _) = send(&app, "POST", "/accounts/acc-3/close", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    send(&app, "POST", "/accounts/acc-3/withdraw", Some(json!({ "amount": 10 }))).await;
    let (status, body) = send(&app, "POST", "/accounts/acc-3/close", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["events"], json!(["AccountClosed"]));

    let (_, body) = send(&app, "GET", "/accounts/acc-3", None).await;
    assert_eq!(body["status"], "Closed");
}

#[tokio::test]
async fn activity_log_sees_account_events() {
    let (app, state) = setup();
    let activity = server::start_activity_log(&state);

    send(&app, "POST", "/accounts/acc-4/open", Some(json!({ "owner": "Kay" }))).await;
    send(&app, "POST", "/accounts/acc-4/deposit", Some(json!({ "amount": 1 }))).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        while state.activity.logged() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("activity log did not catch up");

    assert!(activity.is_running());
    activity.stop().await;
}

#[tokio::test]
async fn metrics_endpoint_renders_prometheus_text() {
    let (app, _) = setup();
    send(&app, "POST", "/accounts/acc-5/open", Some(json!({ "owner": "Mo" }))).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("aggregate_commands_executed"));
}

//! Integration tests for the API server.

use std::sync::OnceLock;
use std::time::Duration;

use api::Runtime;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_store::InMemoryEventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

async fn setup_with_limit(limit_cents: i64) -> (axum::Router, Runtime<InMemoryEventStore>) {
    let config = Config {
        default_credit_limit_cents: limit_cents,
        shutdown_grace: Duration::from_secs(1),
        ..Config::default()
    };
    let runtime = api::start_runtime(InMemoryEventStore::new(), "memory", &config)
        .await
        .unwrap();
    let app = api::create_app(runtime.state.clone(), get_metrics_handle());
    (app, runtime)
}

async fn setup() -> (axum::Router, Runtime<InMemoryEventStore>) {
    setup_with_limit(1_000_000).await
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_trade(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/trades")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn trade_body(quantity: u32, price_cents: i64) -> serde_json::Value {
    serde_json::json!({
        "account_id": "acc-1",
        "instrument": "ACME",
        "side": "BUY",
        "quantity": quantity,
        "price_cents": price_cents
    })
}

async fn wait_for_status(app: &axum::Router, trade_id: &str, status: &str) -> serde_json::Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let response = app
                .clone()
                .oneshot(get(&format!("/trades/{trade_id}")))
                .await
                .unwrap();
            let json = body_json(response).await;
            if json["status"] == status {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trade did not reach the expected status")
}

#[tokio::test]
async fn test_health_check() {
    let (app, runtime) = setup().await;

    let response = app.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"], "memory");
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_execute_trade_is_accepted_then_completed() {
    let (app, runtime) = setup().await;

    let response = app
        .clone()
        .oneshot(post_trade(trade_body(10, 1_500)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(response.headers().contains_key("x-correlation-id"));
    let json = body_json(response).await;
    assert_eq!(json["status"], "REQUESTED");
    assert_eq!(json["account_id"], "acc-1");
    assert_eq!(json["instrument"], "ACME");
    assert_eq!(json["side"], "BUY");
    assert_eq!(json["quantity"], 10);
    assert_eq!(json["price_cents"], 1_500);
    assert_eq!(json["version"], 0);

    let trade_id = json["trade_id"].as_str().unwrap().to_string();
    let completed = wait_for_status(&app, &trade_id, "COMPLETED").await;
    assert_eq!(completed["version"], 1);

    let response = app.oneshot(get("/accounts/acc-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let account = body_json(response).await;
    assert_eq!(account["reserved_cents"], 15_000);

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_trade_over_the_credit_limit_is_rejected() {
    let (app, runtime) = setup_with_limit(1_000).await;

    let response = app
        .clone()
        .oneshot(post_trade(trade_body(1, 5_000)))
        .await
        .unwrap();
    let json = body_json(response).await;
    let trade_id = json["trade_id"].as_str().unwrap().to_string();

    let rejected = wait_for_status(&app, &trade_id, "REJECTED").await;
    assert!(
        rejected["rejection_reason"]
            .as_str()
            .unwrap()
            .starts_with("credit limit exceeded")
    );
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_sequential_trades_get_distinct_ids() {
    let (app, runtime) = setup().await;

    let first = body_json(app.clone().oneshot(post_trade(trade_body(1, 100))).await.unwrap()).await;
    let second = body_json(app.clone().oneshot(post_trade(trade_body(1, 100))).await.unwrap()).await;

    assert_eq!(first["trade_id"], "1");
    assert_eq!(second["trade_id"], "2");
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_invalid_trade_is_bad_request() {
    let (app, runtime) = setup().await;

    let response = app.oneshot(post_trade(trade_body(0, 100))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("quantity"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_malformed_correlation_id_is_bad_request() {
    let (app, runtime) = setup().await;

    let mut request = post_trade(trade_body(1, 100));
    request
        .headers_mut()
        .insert("x-correlation-id", "not-a-uuid".parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_caller_correlation_id_is_echoed() {
    let (app, runtime) = setup().await;
    let correlation_id = "6f9619ff-8b86-d011-b42d-00cf4fc964ff";

    let mut request = post_trade(trade_body(1, 100));
    request
        .headers_mut()
        .insert("x-correlation-id", correlation_id.parse().unwrap());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-correlation-id"], correlation_id);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_trade_is_not_found() {
    let (app, runtime) = setup().await;

    let response = app.oneshot(get("/trades/999")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("trade-999"));
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_account_is_not_found() {
    let (app, runtime) = setup().await;

    let response = app.oneshot(get("/accounts/nobody")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    runtime.shutdown().await;
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, runtime) = setup().await;

    app.clone()
        .oneshot(post_trade(trade_body(1, 100)))
        .await
        .unwrap();

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("repository_saves_total"));
    runtime.shutdown().await;
}

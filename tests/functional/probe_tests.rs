//! HTTP probes against a local axum server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use odh_test_fixtures::fixtures::registry::REGISTERED_MODELS_PATH;
use odh_test_fixtures::probe::{self, ProbeError};

const TOKEN: &str = "sha256~test-token";

/// Serve `router` on an ephemeral port and return its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn infer(
    Path(model): Path<String>,
    headers: HeaderMap,
    Json(request): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    let inputs = request.get("inputs").cloned().unwrap_or(Value::Null);
    (
        StatusCode::OK,
        Json(json!({"model_name": model, "outputs": inputs})),
    )
}

async fn chat(Json(request): Json<Value>) -> Json<Value> {
    let model = request.get("model").cloned().unwrap_or(Value::Null);
    Json(json!({
        "model": model,
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "hi"}}]
    }))
}

fn inference_router() -> Router {
    Router::new()
        .route("/v2/models/{model}/infer", post(infer))
        .route("/v1/chat/completions", post(chat))
}

#[tokio::test]
async fn test_v2_infer_sends_bearer_token() {
    let base = serve(inference_router()).await;
    let client = probe::build().with_bearer_token(TOKEN).build().unwrap();

    let response = client
        .v2_infer(&base, "sklearn-iris", &json!({"inputs": [1, 2, 3]}))
        .await
        .unwrap();

    assert_eq!(response["model_name"], "sklearn-iris");
    assert_eq!(response["outputs"], json!([1, 2, 3]));
}

#[tokio::test]
async fn test_v2_infer_without_token_reports_status() {
    let base = serve(inference_router()).await;
    let client = probe::build().build().unwrap();

    let err = client
        .v2_infer(&base, "sklearn-iris", &json!({"inputs": []}))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(401));
    assert!(matches!(err, ProbeError::Status { ref body, .. } if body.contains("unauthorized")));
}

#[tokio::test]
async fn test_chat_completion() {
    let base = serve(inference_router()).await;
    let client = probe::build().build().unwrap();

    let response = client
        .chat_completion(
            &format!("{base}/"),
            &json!({"model": "granite", "messages": [{"role": "user", "content": "hello"}]}),
        )
        .await
        .unwrap();

    assert_eq!(response["choices"][0]["message"]["role"], "assistant");
}

/// A 200 without the expected shape is not a healthy server.
#[tokio::test]
async fn test_unexpected_body_rejected() {
    let router = Router::new().route(
        REGISTERED_MODELS_PATH,
        get(|| async { "<html>Application is not available</html>" }),
    );
    let base = serve(router).await;
    let client = probe::build().build().unwrap();

    let err = client.registered_models(&base).await.unwrap_err();

    assert!(matches!(err, ProbeError::UnexpectedBody { expected: "items", .. }));
}

#[tokio::test]
async fn test_registered_models() {
    let router = Router::new().route(
        REGISTERED_MODELS_PATH,
        get(|| async { Json(json!({"items": [], "size": 0, "pageSize": 100})) }),
    );
    let base = serve(router).await;
    let client = probe::build().build().unwrap();

    let response = client.registered_models(&base).await.unwrap();
    assert_eq!(response["size"], 0);
}

#[tokio::test]
async fn test_server_error_reported_with_body() {
    let router = Router::new().route(
        "/v1/chat/completions",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "model not loaded") }),
    );
    let base = serve(router).await;
    let client = probe::build().build().unwrap();

    let err = client.chat_completion(&base, &json!({})).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("model not loaded"));
}

async fn flaky_health(State(calls): State<Arc<AtomicU32>>) -> StatusCode {
    if calls.fetch_add(1, Ordering::SeqCst) >= 2 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[tokio::test]
async fn test_wait_until_healthy_polls() {
    let calls = Arc::new(AtomicU32::new(0));
    let router = Router::new()
        .route("/healthz", get(flaky_health))
        .with_state(Arc::clone(&calls));
    let base = serve(router).await;
    let client = probe::build().build().unwrap();

    client
        .wait_until_healthy(
            &format!("{base}/healthz"),
            Duration::from_secs(5),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_wait_until_healthy_times_out_with_last_status() {
    let router = Router::new().route("/healthz", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let base = serve(router).await;
    let client = probe::build().build().unwrap();

    let err = client
        .wait_until_healthy(
            &format!("{base}/healthz"),
            Duration::from_millis(200),
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();

    match err {
        ProbeError::Timeout { last_status, .. } => {
            assert_eq!(last_status.as_deref(), Some("HTTP 503"));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use httpmock::Method::POST;
use httpmock::MockServer;
use serde_json::json;
use tempfile::tempdir;
use tower::ServiceExt;

use gemini_relay::config::RelayConfig;
use gemini_relay::daemon::{build_router, AppState};
use gemini_relay::error::{GeminiRelayError, GenerationErrorKind};
use gemini_relay::relay::{GeminiRelay, EMPTY_REPLY_MESSAGE};
use gemini_relay::transcript::TranscriptStore;

const GENERATE_PATH: &str = "/models/gemini-2.5-flash:generateContent";

fn make_state(server: &MockServer, dir: &std::path::Path) -> AppState {
    let mut config = RelayConfig::new("test-key");
    config.base_url = server.base_url();
    config.request_timeout_secs = 5;
    AppState {
        relay: Arc::new(GeminiRelay::new(config)),
        store: Arc::new(TranscriptStore::new(dir).unwrap()),
    }
}

fn reply_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn daemon_health_reports_ok() {
    let server = MockServer::start_async().await;
    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let value = body_json(response).await;
    assert_eq!(value.get("status").and_then(|v| v.as_str()), Some("OK"));
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .expect("timestamp string");
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[tokio::test]
async fn daemon_gemini_happy_path() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(GENERATE_PATH)
                .query_param("key", "test-key");
            then.status(200).json_body(reply_body("Hello there"));
        })
        .await;

    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gemini")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "userQuery": "Hi",
                        "conversationHistory": [
                            {"role": "user", "parts": [{"text": "earlier question"}]},
                            {"role": "model", "parts": [{"text": "earlier answer"}]}
                        ]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "Hello there");
    generate.assert_calls(1);
}

#[tokio::test]
async fn daemon_gemini_rejects_empty_query_without_calling_upstream() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST).path(GENERATE_PATH);
            then.status(200).json_body(reply_body("unused"));
        })
        .await;

    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    for payload in [json!({"userQuery": "   "}), json!({})] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/gemini")
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_string(response).await, "userQuery is required");
    }
    generate.assert_calls(0);
}

#[tokio::test]
async fn daemon_gemini_bounds_replayed_history() {
    let server = MockServer::start_async().await;
    // Only the last 20 of 25 messages may be replayed: q4 must be dropped,
    // q5 and q24 must survive. The decoy mock is registered first so any
    // request still carrying q4 is answered by it instead.
    let decoy = server
        .mock_async(|when, then| {
            when.method(POST).path(GENERATE_PATH).body_includes("\"q4\"");
            then.status(200).json_body(reply_body("unbounded"));
        })
        .await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(GENERATE_PATH)
                .body_includes("\"q5\"")
                .body_includes("\"q24\"");
            then.status(200).json_body(reply_body("bounded"));
        })
        .await;

    let history: Vec<serde_json::Value> = (0..25)
        .map(|i| json!({"role": "user", "parts": [{"text": format!("q{i}")}]}))
        .collect();

    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gemini")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"userQuery": "Hi", "conversationHistory": history}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "bounded");
    decoy.assert_calls(0);
    generate.assert_calls(1);
}

#[tokio::test]
async fn daemon_gemini_maps_quota_errors_to_fixed_sentence() {
    let server = MockServer::start_async().await;
    let generate = server
        .mock_async(|when, then| {
            when.method(POST).path(GENERATE_PATH);
            then.status(429).json_body(json!({
                "error": {
                    "code": 429,
                    "status": "RESOURCE_EXHAUSTED",
                    "message": "Quota exceeded for quota metric 'Generate requests'"
                }
            }));
        })
        .await;

    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gemini")
                .header("content-type", "application/json")
                .body(Body::from(json!({"userQuery": "Hi"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = body_string(response).await;
    assert_eq!(body, GenerationErrorKind::QuotaExceeded.user_message());
    // Vendor error text never reaches the client.
    assert!(!body.contains("RESOURCE_EXHAUSTED"));
    generate.assert_calls(1);
}

#[tokio::test]
async fn daemon_gemini_substitutes_sentence_for_empty_reply() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(GENERATE_PATH);
            then.status(200).json_body(reply_body("  \n "));
        })
        .await;

    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/gemini")
                .header("content-type", "application/json")
                .body(Body::from(json!({"userQuery": "Hi"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, EMPTY_REPLY_MESSAGE);
}

#[tokio::test]
async fn daemon_save_then_load_round_trip() {
    let server = MockServer::start_async().await;
    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save-history")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({
                        "userId": "alice",
                        "history": [{"role": "user", "parts": [{"text": "hello"}]}]
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value.get("success").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(value.get("messageCount").and_then(|v| v.as_u64()), Some(1));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/load-history")
                .header("content-type", "application/json")
                .body(Body::from(json!({"userId": "alice"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value.get("messageCount").and_then(|v| v.as_u64()), Some(1));
    assert!(value
        .get("lastUpdated")
        .and_then(|v| v.as_str())
        .is_some());
    let history = value
        .get("history")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0],
        json!({"role": "user", "parts": [{"text": "hello"}]})
    );
}

#[tokio::test]
async fn daemon_load_history_for_unknown_user_is_empty() {
    let server = MockServer::start_async().await;
    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/load-history")
                .header("content-type", "application/json")
                .body(Body::from(json!({"userId": "nobody"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = body_json(response).await;
    assert_eq!(value.get("messageCount").and_then(|v| v.as_u64()), Some(0));
    assert!(value.get("lastUpdated").map(|v| v.is_null()).unwrap_or(false));
    assert_eq!(
        value.get("history").and_then(|v| v.as_array()).map(Vec::len),
        Some(0)
    );
}

#[tokio::test]
async fn daemon_save_history_validates_fields() {
    let server = MockServer::start_async().await;
    let temp = tempdir().unwrap();
    let app = build_router(make_state(&server, temp.path()));

    let missing_user = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save-history")
                .header("content-type", "application/json")
                .body(Body::from(json!({"history": []}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(missing_user.status(), StatusCode::BAD_REQUEST);
    let value = body_json(missing_user).await;
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("userId is required")
    );

    let bad_history = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/save-history")
                .header("content-type", "application/json")
                .body(Body::from(
                    json!({"userId": "alice", "history": "not a list"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bad_history.status(), StatusCode::BAD_REQUEST);
    let value = body_json(bad_history).await;
    assert_eq!(
        value.get("error").and_then(|v| v.as_str()),
        Some("history must be an array")
    );
}

#[tokio::test]
async fn relay_times_out_on_slow_upstream() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(GENERATE_PATH);
            then.status(200)
                .delay(Duration::from_secs(5))
                .json_body(reply_body("too late"));
        })
        .await;

    let mut config = RelayConfig::new("test-key");
    config.base_url = server.base_url();
    config.request_timeout_secs = 1;
    let relay = GeminiRelay::new(config);

    let err = relay.generate("hi", &[]).await.unwrap_err();
    match err {
        GeminiRelayError::Generation { kind, .. } => {
            assert_eq!(kind, GenerationErrorKind::Timeout);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

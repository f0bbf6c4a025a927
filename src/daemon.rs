use std::future::Future;
use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::{GeminiRelayError, GenerationErrorKind, Result};
use crate::history;
use crate::relay::GeminiRelay;
use crate::transcript::TranscriptStore;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<GeminiRelay>,
    pub store: Arc<TranscriptStore>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    #[serde(default)]
    user_query: Option<String>,
    #[serde(default)]
    conversation_history: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveHistoryRequest {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    history: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadHistoryRequest {
    #[serde(default)]
    user_id: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/gemini", post(gemini))
        .route("/save-history", post(save_history))
        .route("/load-history", post(load_history))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// One chat turn: validate the query, bound the replayed history, relay to
/// the generation API. The body is always plain text, success or not.
async fn gemini(
    State(state): State<AppState>,
    Json(payload): Json<GeminiRequest>,
) -> (StatusCode, String) {
    let query = payload.user_query.as_deref().unwrap_or("").trim().to_string();
    if query.is_empty() {
        return (StatusCode::BAD_REQUEST, "userQuery is required".to_string());
    }

    let bounded = history::bound(&history::coerce_wire(&payload.conversation_history));
    info!(query_len = query.len(), history_len = bounded.len(), "chat turn");

    match state.relay.generate(&query, &bounded).await {
        Ok(text) if text.trim().is_empty() => {
            // The relay substitutes a fixed sentence for empty replies, so
            // this branch should be unreachable; answer generically if not.
            warn!("relay produced an empty reply");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                GenerationErrorKind::Unknown.user_message().to_string(),
            )
        }
        Ok(text) => (StatusCode::OK, text),
        Err(GeminiRelayError::Generation { kind, detail }) => {
            error!("chat turn failed ({kind:?}): {detail}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                kind.user_message().to_string(),
            )
        }
        Err(err) => {
            error!("chat turn failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                GenerationErrorKind::Unknown.user_message().to_string(),
            )
        }
    }
}

async fn save_history(
    State(state): State<AppState>,
    Json(payload): Json<SaveHistoryRequest>,
) -> (StatusCode, Json<Value>) {
    let user_id = payload.user_id.unwrap_or_default();
    if user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "userId is required"})),
        );
    }
    if !payload.history.is_array() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "history must be an array"})),
        );
    }

    let history = history::coerce_wire(&payload.history);
    match state.store.save(&user_id, history) {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({"success": true, "messageCount": record.message_count})),
        ),
        Err(GeminiRelayError::Validation(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
        }
        Err(err) => {
            error!("save-history failed for user_id={user_id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "could not save conversation"})),
            )
        }
    }
}

async fn load_history(
    State(state): State<AppState>,
    Json(payload): Json<LoadHistoryRequest>,
) -> (StatusCode, Json<Value>) {
    let user_id = payload.user_id.unwrap_or_default();
    if user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "userId is required"})),
        );
    }

    match state.store.load(&user_id) {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(json!({
                "history": record.history,
                "lastUpdated": record.last_updated.to_rfc3339(),
                "messageCount": record.message_count,
            })),
        ),
        // A first-time user simply has nothing saved yet.
        Ok(None) => (
            StatusCode::OK,
            Json(json!({"history": [], "lastUpdated": null, "messageCount": 0})),
        ),
        Err(GeminiRelayError::Validation(message)) => {
            (StatusCode::BAD_REQUEST, Json(json!({"error": message})))
        }
        Err(err) => {
            error!("load-history failed for user_id={user_id}: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "could not load conversation"})),
            )
        }
    }
}

pub async fn run(host: &str, port: u16, state: AppState) -> Result<()> {
    run_with_shutdown(host, port, state, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(host: &str, port: u16, state: AppState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| GeminiRelayError::Runtime(e.to_string()))?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| GeminiRelayError::Runtime(e.to_string()))?;

    Ok(())
}

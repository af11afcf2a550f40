//! Axum-based event streaming server.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Path, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use axum::http::StatusCode;
use axum::routing::{delete, post};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use weave_core::error::WeaveError;
use weave_store::ArtifactStore;
use weave_sync::{MessageRecord, SyncReconciler, ThreadRecord};

use crate::hub::EventHub;

/// Shared state for all routes and connections.
pub struct AppState {
    pub store: Arc<ArtifactStore>,
    pub hub: Arc<EventHub>,
    pub sync: Arc<SyncReconciler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/threads/{thread_id}/events", get(events_ws_handler))
        .route("/threads/{thread_id}/artifacts", get(thread_artifacts_handler))
        .route("/threads", get(list_threads_handler).post(create_thread_handler))
        .route("/threads/{thread_id}", delete(delete_thread_handler))
        .route(
            "/threads/{thread_id}/messages",
            post(add_message_handler).get(list_messages_handler),
        )
        .route(
            "/threads/{thread_id}/messages/{message_id}",
            delete(delete_message_handler),
        )
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn error_response(e: WeaveError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        WeaveError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

/// Start the gateway server with graceful shutdown.
pub async fn start_gateway(state: Arc<AppState>, bind: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}

async fn events_ws_handler(
    ws: WebSocketUpgrade,
    Path(thread_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_connection(state, thread_id, socket))
}

async fn handle_events_connection(state: Arc<AppState>, thread_id: String, ws: WebSocket) {
    info!(thread_id = %thread_id, "Canvas client connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    // No replay on (re)connect: the client resumes listening for new
    // events only.
    let mut rx = state.hub.subscribe(&thread_id).await;

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Drain client messages; the event stream is one-way.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    send_task.abort();
    debug!(thread_id = %thread_id, "Canvas client disconnected");
}

async fn thread_artifacts_handler(
    Path(thread_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.store.thread_artifacts(&thread_id).await)
}

async fn list_threads_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ThreadRecord>>, (StatusCode, Json<serde_json::Value>)> {
    state
        .sync
        .local()
        .list_threads()
        .await
        .map(Json)
        .map_err(error_response)
}

/// Local-first: the thread is committed here before the handler returns;
/// the remote mirror runs in the background and cannot fail the request.
async fn create_thread_handler(
    State(state): State<Arc<AppState>>,
    Json(thread): Json<ThreadRecord>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state
        .sync
        .create_thread(thread)
        .await
        .map(|_| StatusCode::CREATED)
        .map_err(error_response)
}

async fn delete_thread_handler(
    Path(thread_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state
        .sync
        .delete_thread(thread_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn add_message_handler(
    Path(thread_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(mut message): Json<MessageRecord>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    message.thread_id = thread_id;
    state
        .sync
        .add_message(message)
        .await
        .map(|_| StatusCode::CREATED)
        .map_err(error_response)
}

async fn list_messages_handler(
    Path(thread_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<MessageRecord>>, (StatusCode, Json<serde_json::Value>)> {
    state
        .sync
        .local()
        .list_messages(&thread_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn delete_message_handler(
    Path((thread_id, message_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    state
        .sync
        .delete_message(thread_id, message_id)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.store.stats().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "artifacts": stats.count,
    }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.stats().await)
}

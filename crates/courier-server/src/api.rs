use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::Method,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use courier_shared::{Conversation, ConversationId, ConversationSummary, PresenceSnapshot, UserId};

use crate::config::ServerConfig;
use crate::conversation::ConversationManager;
use crate::error::ChatError;
use crate::lifecycle::LifecycleHandler;
use crate::presence::{PresenceRegistry, PresenceStats};
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<PresenceRegistry>,
    pub conversations: Arc<ConversationManager>,
    pub lifecycle: Arc<LifecycleHandler>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/info", get(server_info))
        .route("/ws", get(ws_handler))
        .route("/api/sessions/:id", get(get_session))
        .route("/api/users/:user_id/sessions", get(user_sessions))
        .route("/api/presence", get(presence_snapshot))
        .route("/api/stats", get(presence_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ServerInfoResponse {
    name: String,
    version: &'static str,
    max_message_length: usize,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn server_info(State(state): State<AppState>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: state.config.instance_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        max_message_length: state.conversations.max_message_length(),
    })
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, ChatError> {
    let conversation_id = ConversationId::parse(&id)
        .map_err(|_| ChatError::validation(format!("Invalid session id: {id}")))?;
    let conversation = state.conversations.get_conversation(conversation_id).await?;
    Ok(Json(conversation))
}

async fn user_sessions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ConversationSummary>>, ChatError> {
    let summaries = state
        .conversations
        .list_conversations_for_user(&UserId::new(user_id))
        .await?;
    Ok(Json(summaries))
}

async fn presence_snapshot(
    State(state): State<AppState>,
) -> Result<Json<PresenceSnapshot>, ChatError> {
    Ok(Json(state.presence.snapshot().await?))
}

async fn presence_stats(State(state): State<AppState>) -> Json<PresenceStats> {
    Json(state.presence.stats().await)
}

pub async fn serve(
    state: AppState,
    addr: std::net::SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP and websocket server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use courier_store::DocumentStore;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::connection::ConnectionHandle;
    use crate::delivery::DeliveryCoordinator;

    async fn test_state(dir: &TempDir) -> AppState {
        let store = Arc::new(DocumentStore::open(dir.path()).await.unwrap());
        let presence = Arc::new(PresenceRegistry::new(store.clone()));
        let conversations = Arc::new(ConversationManager::new(store, presence.clone(), 140));
        let delivery = Arc::new(DeliveryCoordinator::new(
            presence.clone(),
            conversations.clone(),
        ));
        let lifecycle = Arc::new(LifecycleHandler::new(
            presence.clone(),
            conversations.clone(),
            delivery,
        ));
        AppState {
            presence,
            conversations,
            lifecycle,
            config: Arc::new(ServerConfig {
                instance_name: "test".into(),
                ..ServerConfig::default()
            }),
        }
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = build_router(state.clone())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_and_info() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = get_json(&state, "/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "test");
        assert_eq!(body["maxMessageLength"], 140);
    }

    #[tokio::test]
    async fn test_session_lookup() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (bob, _bob_rx) = ConnectionHandle::new();
        state
            .presence
            .set_online("bob".into(), "mb".into(), bob)
            .await;
        let conv = state
            .conversations
            .create_conversation("ma".into(), "alice".into(), "bob".into())
            .await
            .unwrap();

        let (status, body) = get_json(&state, &format!("/api/sessions/{}", conv.conversation_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["conversationId"], conv.conversation_id.to_string());
        assert_eq!(body["participants"], serde_json::json!(["alice", "bob"]));

        let (status, body) = get_json(&state, "/api/sessions/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let missing = ConversationId::new();
        let (status, _) = get_json(&state, &format!("/api/sessions/{missing}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_json(&state, "/api/users/alice/sessions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = get_json(&state, "/api/users/carol/sessions").await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presence_endpoints() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (conn, _rx) = ConnectionHandle::new();
        state
            .presence
            .set_online("alice".into(), "ma".into(), conn)
            .await;

        let (status, body) = get_json(&state, "/api/presence").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alice"]["machineId"], "ma");
        assert_eq!(body["alice"]["status"], "online");

        let (status, body) = get_json(&state, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["liveConnections"], 1);
        assert_eq!(body["knownUsers"], 1);
    }
}

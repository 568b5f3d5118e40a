use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use medichat_core::TokenVerifier;
use medichat_store::conversations::ConversationRepo;
use medichat_store::groups::GroupRepo;
use medichat_store::messages::MessageRepo;
use medichat_store::{Database, StoreError};

use crate::http;
use crate::presence::PresenceTracker;
use crate::registry::ConnectionRegistry;
use crate::socket;

/// Server configuration.
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 5000,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers. The registry and
/// presence tracker are the only in-process shared mutable state; the
/// store is the source of truth for everything durable.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub conversations: ConversationRepo,
    pub messages: MessageRepo,
    pub groups: GroupRepo,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    pub fn new(db: Database, verifier: Arc<TokenVerifier>, max_send_queue: usize) -> Self {
        Self {
            conversations: ConversationRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            groups: GroupRepo::new(db.clone()),
            registry: Arc::new(ConnectionRegistry::new(max_send_queue)),
            presence: Arc::new(PresenceTracker::new()),
            verifier,
            db,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(db: Database) -> Self {
        Self::new(db, Arc::new(TokenVerifier::new("test-secret")), 32)
    }
}

/// Build the Axum router with the live socket and the HTTP chat surface.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(health_handler))
        .route(
            "/api/chat/conversations",
            get(http::list_conversations).post(http::start_conversation),
        )
        .route(
            "/api/chat/conversations/{id}/messages",
            get(http::conversation_messages),
        )
        .route(
            "/api/chat/conversations/{id}/archive",
            patch(http::archive_conversation),
        )
        .route(
            "/api/chat/groups",
            get(http::list_groups).post(http::create_group),
        )
        .route(
            "/api/chat/groups/{id}/messages",
            get(http::group_messages).post(http::send_group_message),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle that keeps it alive and
/// exposes the bound port.
pub async fn start(
    config: ServerConfig,
    db: Database,
    verifier: TokenVerifier,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState::new(db, Arc::new(verifier), config.max_send_queue);
    let router = build_router(state);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "chat server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
}

/// Liveness probe: the store must answer a trivial query.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let healthy = state
        .db
        .with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(StoreError::from)
        })
        .is_ok();

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if healthy { "healthy" } else { "unhealthy" },
            "connections": state.registry.count(),
            "online_users": state.presence.online_count(),
        })),
    )
}

//! WebSocket endpoint: authentication handshake, connection lifecycle,
//! and the per-connection event loop.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use medichat_core::auth::AuthRejection;
use medichat_core::events::ServerEvent;
use medichat_core::identity::Identity;

use crate::relay;
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler. The token travels as connection metadata
/// (query parameter or Authorization header), never as a first event; a
/// missing or invalid token refuses the connection before any event loop
/// starts.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    match authorize(&state, &query, &headers) {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, identity, state)),
        Err(rejection) => {
            tracing::warn!(reason = rejection.kind(), "connection refused");
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({
                    "message": format!("Authentication error: {rejection}"),
                })),
            )
                .into_response()
        }
    }
}

pub(crate) fn authorize(
    state: &AppState,
    query: &WsAuthQuery,
    headers: &HeaderMap,
) -> Result<Identity, AuthRejection> {
    let token = query
        .token
        .clone()
        .or_else(|| bearer_token(headers).map(ToOwned::to_owned));
    state.verifier.verify(token.as_deref())
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Drive one authenticated connection to completion. Everything after the
/// handshake funnels through here, including cleanup when the transport
/// drops without a close frame.
async fn handle_socket(socket: WebSocket, identity: Identity, state: AppState) {
    let (conn_id, mut rx) = state.registry.register(identity.user_id);
    tracing::info!(
        connection_id = %conn_id,
        user_id = %identity.user_id,
        role = %identity.role,
        "client connected"
    );

    let came_online = state.presence.mark_online(identity.user_id);
    if let Ok(snapshot) = serde_json::to_string(&ServerEvent::OnlineUsers(state.presence.snapshot()))
    {
        if came_online {
            state.registry.broadcast_all(&snapshot);
        } else {
            // The online set didn't change, but this connection still
            // needs to learn it
            state.registry.send_to(&conn_id, &snapshot);
        }
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer task: drain the registry queue into the socket, keepalive pings
    let writer_cid = conn_id.clone();
    let mut writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Some(text) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(connection_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    // Reader loop: events are processed in arrival order, one at a time
    let reader_state = state.clone();
    let reader_cid = conn_id.clone();
    let mut reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            match msg {
                WsMessage::Text(text) => {
                    relay::dispatch(&reader_state, &reader_cid, &identity, &text.to_string());
                }
                WsMessage::Close(_) => break,
                _ => {} // axum answers pings itself; pongs carry nothing
            }
        }
    });

    // Either side ending means the transport is done; both paths run the
    // same cleanup as a graceful disconnect.
    tokio::select! {
        _ = &mut writer => reader.abort(),
        _ = &mut reader => writer.abort(),
    }

    state.registry.unregister(&conn_id);
    if state.presence.mark_offline(identity.user_id) {
        if let Ok(snapshot) =
            serde_json::to_string(&ServerEvent::OnlineUsers(state.presence.snapshot()))
        {
            state.registry.broadcast_all(&snapshot);
        }
    }
    tracing::info!(connection_id = %conn_id, user_id = %identity.user_id, "client disconnected");
}

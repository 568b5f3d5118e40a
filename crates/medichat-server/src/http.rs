//! HTTP chat surface. Shares the resolver and persistence gateway with the
//! live relay but sits outside the live-delivery path.

use axum::extract::{FromRequestParts, Path, State};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use medichat_core::error::ChatError;
use medichat_core::identity::Identity;
use medichat_core::ids::{ConversationId, GroupId, UserId};
use medichat_core::model::{GroupMessage, Message};
use medichat_store::groups::GroupRow;
use medichat_store::StoreError;

use crate::relay;
use crate::server::AppState;

/// Chat failure rendered as an HTTP response. Clients see the taxonomy's
/// client-safe text; detail stays in the server log.
pub struct ApiError(pub ChatError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::AuthRejected(_) => StatusCode::UNAUTHORIZED,
            ChatError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ChatError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            ChatError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(serde_json::json!({ "message": self.0.client_message() })),
        )
            .into_response()
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

/// Bearer-token extractor; every chat endpoint requires a verified
/// identity.
pub struct AuthIdentity(pub Identity);

impl FromRequestParts<AppState> for AuthIdentity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        state
            .verifier
            .verify(token)
            .map(AuthIdentity)
            .map_err(|rejection| ApiError(ChatError::from(rejection)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    #[serde(default)]
    pub recipient_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct SendGroupMessageRequest {
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub other_user_id: UserId,
}

/// GET /api/chat/conversations — the caller's non-archived conversations.
pub async fn list_conversations(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let rows = state
        .conversations
        .list_for_user(me.user_id)
        .map_err(persistence)?;
    Ok(Json(
        rows.into_iter()
            .map(|row| ConversationSummary {
                conversation_id: row.conversation_id,
                other_user_id: row.other_participant(me.user_id),
            })
            .collect(),
    ))
}

/// POST /api/chat/conversations — explicit start-conversation. 201 on
/// creation, 200 when the pair already has a row.
pub async fn start_conversation(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Json(req): Json<StartConversationRequest>,
) -> Result<Response, ApiError> {
    let (row, created) = relay::start_conversation(&state, &me, req.recipient_id)?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(serde_json::json!({ "conversation_id": row.conversation_id })),
    )
        .into_response())
}

/// GET /api/chat/conversations/{id}/messages — participant-only history,
/// oldest first.
pub async fn conversation_messages(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let id = ConversationId::new(id);
    require_participant(&state, id, me.user_id, "Not authorized to view this conversation")?;
    let messages = state
        .messages
        .list_for_conversation(id)
        .map_err(persistence)?;
    Ok(Json(messages))
}

/// PATCH /api/chat/conversations/{id}/archive
pub async fn archive_conversation(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = ConversationId::new(id);
    require_participant(&state, id, me.user_id, "Not authorized to archive this conversation")?;
    state.conversations.archive(id).map_err(persistence)?;
    Ok(Json(serde_json::json!({ "message": "Conversation archived" })))
}

/// POST /api/chat/groups
pub async fn create_group(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Response, ApiError> {
    let group = relay::create_group(&state, me.user_id, &req.name, &req.member_ids)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "group_id": group.group_id })),
    )
        .into_response())
}

/// GET /api/chat/groups — groups the caller is a member of.
pub async fn list_groups(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
) -> Result<Json<Vec<GroupRow>>, ApiError> {
    let groups = state.groups.list_for_user(me.user_id).map_err(persistence)?;
    Ok(Json(groups))
}

/// GET /api/chat/groups/{id}/messages — member-only history, oldest first.
pub async fn group_messages(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Path(id): Path<i64>,
) -> Result<Json<Vec<GroupMessage>>, ApiError> {
    let messages = relay::group_messages(&state, me.user_id, GroupId::new(id))?;
    Ok(Json(messages))
}

/// POST /api/chat/groups/{id}/messages — persists, then pushes the stored
/// message to every member's open connections.
pub async fn send_group_message(
    State(state): State<AppState>,
    AuthIdentity(me): AuthIdentity,
    Path(id): Path<i64>,
    Json(req): Json<SendGroupMessageRequest>,
) -> Result<Response, ApiError> {
    let message = relay::send_group_message(&state, me.user_id, GroupId::new(id), &req.content)?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

fn require_participant(
    state: &AppState,
    id: ConversationId,
    user: UserId,
    denial: &str,
) -> Result<(), ApiError> {
    let allowed = state
        .conversations
        .is_participant(id, user)
        .map_err(persistence)?;
    if allowed {
        Ok(())
    } else {
        Err(ApiError(ChatError::not_authorized(denial)))
    }
}

fn persistence(err: StoreError) -> ApiError {
    tracing::error!(error = %err, "store failure in http handler");
    ApiError(ChatError::persistence(err))
}

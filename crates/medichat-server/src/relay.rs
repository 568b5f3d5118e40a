//! Per-event protocol handlers: validate, resolve, persist, fan out.
//!
//! Every failure is caught here and reported back to the invoking
//! connection or HTTP caller; nothing in this module closes a connection.

use medichat_core::error::ChatError;
use medichat_core::events::{ClientEvent, SendMessageRequest, ServerEvent};
use medichat_core::identity::Identity;
use medichat_core::ids::{ConnectionId, GroupId, UserId};
use medichat_core::model::{GroupMessage, Message};
use medichat_store::conversations::ConversationRow;
use medichat_store::groups::GroupRow;

use crate::server::AppState;

/// Parse one inbound frame and route it. Errors become a `chatError` event
/// on the invoking connection only; the event loop keeps running.
pub fn dispatch(state: &AppState, conn_id: &ConnectionId, sender: &Identity, raw: &str) {
    let event: ClientEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(connection_id = %conn_id, error = %e, "unparseable client event");
            report(state, conn_id, "Unrecognized chat event.");
            return;
        }
    };

    match event {
        ClientEvent::SendMessage(req) => {
            if let Err(e) = send_message(state, sender, &req) {
                tracing::warn!(
                    connection_id = %conn_id,
                    sender = %sender.user_id,
                    kind = e.kind(),
                    error = %e,
                    "sendMessage failed"
                );
                report(state, conn_id, &e.client_message());
            }
        }
    }
}

/// Handle one `sendMessage` event: validate, resolve the conversation,
/// persist, then deliver the stored message to both participants' live
/// connections. The sender's copy is the delivery acknowledgment.
pub fn send_message(
    state: &AppState,
    sender: &Identity,
    req: &SendMessageRequest,
) -> Result<Message, ChatError> {
    let receiver = req.receiver_id.filter(|id| *id > 0).map(UserId::new);
    let content = req.content.as_deref().unwrap_or("");
    let Some(receiver) = receiver else {
        return Err(ChatError::validation("Receiver and content are required."));
    };
    if content.is_empty() {
        return Err(ChatError::validation("Receiver and content are required."));
    }

    let (conversation, _created) = state
        .conversations
        .find_or_create(sender, receiver)
        .map_err(|e| {
            tracing::error!(error = %e, "conversation resolution failed");
            ChatError::persistence(e)
        })?;

    let message = state
        .messages
        .insert(conversation.conversation_id, sender.user_id, receiver, content)
        .map_err(|e| {
            tracing::error!(error = %e, "message persist failed");
            ChatError::persistence(e)
        })?;

    if let Ok(payload) = serde_json::to_string(&ServerEvent::ReceiveMessage(message.clone())) {
        state.registry.send_to_user(receiver, &payload);
        state.registry.send_to_user(sender.user_id, &payload);
    }

    Ok(message)
}

/// Explicit start-conversation used by the HTTP surface. Shares the
/// resolver with the live relay; returns whether the row is new.
pub fn start_conversation(
    state: &AppState,
    initiator: &Identity,
    recipient: Option<i64>,
) -> Result<(ConversationRow, bool), ChatError> {
    let Some(recipient) = recipient.filter(|id| *id > 0).map(UserId::new) else {
        return Err(ChatError::validation("Recipient ID is required."));
    };
    state
        .conversations
        .find_or_create(initiator, recipient)
        .map_err(|e| {
            tracing::error!(error = %e, "conversation resolution failed");
            ChatError::persistence(e)
        })
}

/// Create a group conversation. The creator is implicitly a member.
pub fn create_group(
    state: &AppState,
    creator: UserId,
    name: &str,
    member_ids: &[UserId],
) -> Result<GroupRow, ChatError> {
    if name.trim().is_empty() || member_ids.is_empty() {
        return Err(ChatError::validation("Name and members are required."));
    }
    state.groups.create(name, creator, member_ids).map_err(|e| {
        tracing::error!(error = %e, "group creation failed");
        ChatError::persistence(e)
    })
}

/// Membership-checked group history, oldest first.
pub fn group_messages(
    state: &AppState,
    user: UserId,
    group_id: GroupId,
) -> Result<Vec<GroupMessage>, ChatError> {
    require_membership(state, group_id, user)?;
    state.groups.list_messages(group_id).map_err(|e| {
        tracing::error!(error = %e, "group message listing failed");
        ChatError::persistence(e)
    })
}

/// Handle one group send: validate, check membership, persist, then push
/// the stored message to every member's live connections. Fan-out is
/// best-effort; the persisted row is the source of truth.
pub fn send_group_message(
    state: &AppState,
    sender: UserId,
    group_id: GroupId,
    content: &str,
) -> Result<GroupMessage, ChatError> {
    if content.is_empty() {
        return Err(ChatError::validation("Content required."));
    }
    require_membership(state, group_id, sender)?;

    let message = state
        .groups
        .insert_message(group_id, sender, content)
        .map_err(|e| {
            tracing::error!(error = %e, "group message persist failed");
            ChatError::persistence(e)
        })?;

    match state.groups.members(group_id) {
        Ok(members) => {
            if let Ok(payload) =
                serde_json::to_string(&ServerEvent::ReceiveGroupMessage(message.clone()))
            {
                for member in members {
                    state.registry.send_to_user(member, &payload);
                }
            }
        }
        Err(e) => {
            tracing::warn!(group_id = %group_id, error = %e, "membership fetch failed, skipping fan-out");
        }
    }

    Ok(message)
}

fn require_membership(state: &AppState, group_id: GroupId, user: UserId) -> Result<(), ChatError> {
    let member = state.groups.is_member(group_id, user).map_err(|e| {
        tracing::error!(error = %e, "membership check failed");
        ChatError::persistence(e)
    })?;
    if member {
        Ok(())
    } else {
        Err(ChatError::not_authorized("Not authorized"))
    }
}

fn report(state: &AppState, conn_id: &ConnectionId, message: &str) {
    if let Ok(payload) = serde_json::to_string(&ServerEvent::chat_error(message)) {
        state.registry.send_to(conn_id, payload.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medichat_core::identity::Role;
    use medichat_store::Database;
    use tokio::sync::mpsc;

    fn state() -> AppState {
        AppState::for_tests(Database::in_memory().unwrap())
    }

    fn professional(id: i64) -> Identity {
        Identity::new(id, Role::Professional)
    }

    fn request(receiver_id: i64, content: &str) -> SendMessageRequest {
        SendMessageRequest {
            receiver_id: Some(receiver_id),
            content: Some(content.to_string()),
        }
    }

    fn recv_event(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn first_message_creates_conversation_and_reaches_both_sides() {
        let state = state();
        let (_c1, mut rx1) = state.registry.register(UserId::new(1));
        let (_c2, mut rx2) = state.registry.register(UserId::new(2));

        let message = send_message(&state, &professional(1), &request(2, "Bonjour")).unwrap();
        assert_eq!(message.sender_id.as_i64(), 1);
        assert_eq!(message.receiver_id.as_i64(), 2);
        assert_eq!(message.content, "Bonjour");

        let conversation = state.conversations.get(message.conversation_id).unwrap();
        assert_eq!(conversation.professional_id.as_i64(), 1);
        assert_eq!(conversation.patient_id.as_i64(), 2);

        for rx in [&mut rx1, &mut rx2] {
            let event = recv_event(rx);
            assert_eq!(event["event"], "receiveMessage");
            assert_eq!(event["data"]["content"], "Bonjour");
            assert_eq!(event["data"]["sender_id"], 1);
            assert_eq!(event["data"]["receiver_id"], 2);
        }
    }

    #[test]
    fn second_message_reuses_the_conversation() {
        let state = state();
        let first = send_message(&state, &professional(1), &request(2, "one")).unwrap();
        let second = send_message(&state, &professional(1), &request(2, "two")).unwrap();

        assert_eq!(first.conversation_id, second.conversation_id);
        assert_ne!(first.message_id, second.message_id);

        let conversations = state.conversations.list_for_user(UserId::new(1)).unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(state.messages.count().unwrap(), 2);
    }

    #[test]
    fn valid_send_persists_exactly_one_message_with_two_deliveries() {
        let state = state();
        let (_c1, mut rx1) = state.registry.register(UserId::new(1));
        let (_c2, mut rx2) = state.registry.register(UserId::new(2));
        let (_c3, mut rx3) = state.registry.register(UserId::new(3));

        send_message(&state, &professional(1), &request(2, "hi")).unwrap();

        assert_eq!(state.messages.count().unwrap(), 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx3.try_recv().is_err());
    }

    #[test]
    fn offline_receiver_still_persists() {
        let state = state();
        let message = send_message(&state, &professional(1), &request(2, "hello?")).unwrap();
        assert_eq!(state.messages.count().unwrap(), 1);
        assert_eq!(message.receiver_id.as_i64(), 2);
    }

    #[test]
    fn empty_content_is_rejected_without_persisting() {
        let state = state();
        let err = send_message(&state, &professional(1), &request(2, "")).unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
        assert_eq!(state.messages.count().unwrap(), 0);
        assert!(state.conversations.list_for_user(UserId::new(1)).unwrap().is_empty());
    }

    #[test]
    fn missing_receiver_is_rejected() {
        let state = state();
        let req = SendMessageRequest {
            receiver_id: None,
            content: Some("hi".into()),
        };
        let err = send_message(&state, &professional(1), &req).unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
        assert_eq!(state.messages.count().unwrap(), 0);
    }

    #[test]
    fn dispatch_reports_validation_error_to_sender_only() {
        let state = state();
        let sender = professional(1);
        let (conn_id, mut sender_rx) = state.registry.register(UserId::new(1));
        let (_c2, mut receiver_rx) = state.registry.register(UserId::new(2));

        let raw = r#"{"event":"sendMessage","data":{"receiverId":2,"content":""}}"#;
        dispatch(&state, &conn_id, &sender, raw);

        let event = recv_event(&mut sender_rx);
        assert_eq!(event["event"], "chatError");
        assert_eq!(event["data"]["message"], "Receiver and content are required.");
        assert!(receiver_rx.try_recv().is_err());
        assert_eq!(state.messages.count().unwrap(), 0);
    }

    #[test]
    fn dispatch_reports_malformed_frames() {
        let state = state();
        let sender = professional(1);
        let (conn_id, mut rx) = state.registry.register(UserId::new(1));

        dispatch(&state, &conn_id, &sender, "not json");
        let event = recv_event(&mut rx);
        assert_eq!(event["event"], "chatError");

        dispatch(&state, &conn_id, &sender, r#"{"event":"unknown","data":{}}"#);
        let event = recv_event(&mut rx);
        assert_eq!(event["event"], "chatError");
    }

    #[test]
    fn dispatch_routes_valid_send() {
        let state = state();
        let sender = professional(1);
        let (conn_id, mut rx) = state.registry.register(UserId::new(1));

        let raw = r#"{"event":"sendMessage","data":{"receiverId":2,"content":"salut"}}"#;
        dispatch(&state, &conn_id, &sender, raw);

        let event = recv_event(&mut rx);
        assert_eq!(event["event"], "receiveMessage");
        assert_eq!(state.messages.count().unwrap(), 1);
    }

    #[test]
    fn start_conversation_reports_created_flag() {
        let state = state();
        let (_, created) = start_conversation(&state, &professional(1), Some(2)).unwrap();
        assert!(created);
        let (_, created) = start_conversation(&state, &professional(1), Some(2)).unwrap();
        assert!(!created);
    }

    #[test]
    fn start_conversation_requires_recipient() {
        let state = state();
        assert!(matches!(
            start_conversation(&state, &professional(1), None),
            Err(ChatError::ValidationFailed(_))
        ));
    }

    #[test]
    fn create_group_validates_name_and_members() {
        let state = state();
        assert!(matches!(
            create_group(&state, UserId::new(1), "", &[UserId::new(2)]),
            Err(ChatError::ValidationFailed(_))
        ));
        assert!(matches!(
            create_group(&state, UserId::new(1), "team", &[]),
            Err(ChatError::ValidationFailed(_))
        ));

        let group = create_group(&state, UserId::new(1), "team", &[UserId::new(2)]).unwrap();
        assert_eq!(group.creator_id.as_i64(), 1);
    }

    #[test]
    fn non_member_group_send_is_rejected_without_persisting() {
        let state = state();
        let group = create_group(&state, UserId::new(1), "team", &[UserId::new(2)]).unwrap();

        let err = send_group_message(&state, UserId::new(3), group.group_id, "intruding")
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAuthorized(_)));
        assert_eq!(state.groups.message_count().unwrap(), 0);
    }

    #[test]
    fn group_send_fans_out_to_all_members() {
        let state = state();
        let group =
            create_group(&state, UserId::new(1), "team", &[UserId::new(2), UserId::new(3)])
                .unwrap();

        let (_c1, mut rx1) = state.registry.register(UserId::new(1));
        let (_c2, mut rx2) = state.registry.register(UserId::new(2));
        let (_c4, mut rx4) = state.registry.register(UserId::new(4));

        let message = send_group_message(&state, UserId::new(1), group.group_id, "hi all").unwrap();
        assert_eq!(message.group_id, group.group_id);

        for rx in [&mut rx1, &mut rx2] {
            let event = recv_event(rx);
            assert_eq!(event["event"], "receiveGroupMessage");
            assert_eq!(event["data"]["content"], "hi all");
        }
        // User 4 is not a member
        assert!(rx4.try_recv().is_err());
    }

    #[test]
    fn group_send_requires_content_before_membership() {
        let state = state();
        let group = create_group(&state, UserId::new(1), "team", &[UserId::new(2)]).unwrap();
        let err = send_group_message(&state, UserId::new(3), group.group_id, "").unwrap_err();
        assert!(matches!(err, ChatError::ValidationFailed(_)));
    }

    #[test]
    fn group_history_requires_membership() {
        let state = state();
        let group = create_group(&state, UserId::new(1), "team", &[UserId::new(2)]).unwrap();
        send_group_message(&state, UserId::new(1), group.group_id, "one").unwrap();

        let listed = group_messages(&state, UserId::new(2), group.group_id).unwrap();
        assert_eq!(listed.len(), 1);

        assert!(matches!(
            group_messages(&state, UserId::new(9), group.group_id),
            Err(ChatError::NotAuthorized(_))
        ));
    }
}

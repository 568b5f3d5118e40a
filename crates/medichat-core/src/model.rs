use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, GroupId, MessageId, UserId};

/// One persisted direct message. Immutable once created; this exact shape
/// is what `receiveMessage` carries on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub sent_at: String,
}

/// One persisted group message, as carried by `receiveGroupMessage`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessage {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: String,
}

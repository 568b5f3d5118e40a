use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::model::{GroupMessage, Message};

/// Events a client may emit over an established connection. Envelope is
/// `{ "event": <name>, "data": <payload> }`; anything that fails to
/// deserialize is reported back as a chat error, never a disconnect.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "sendMessage")]
    SendMessage(SendMessageRequest),
}

/// Payload of `sendMessage`. Fields are optional at the wire level so a
/// malformed request surfaces as a validation failure rather than a parse
/// failure, mirroring the presence checks the relay performs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SendMessageRequest {
    pub receiver_id: Option<i64>,
    pub content: Option<String>,
}

/// Events the server pushes to connected clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Full persisted message, delivered to both participants. The copy
    /// the sender receives back is the delivery acknowledgment.
    #[serde(rename = "receiveMessage")]
    ReceiveMessage(Message),

    /// Full persisted group message, delivered to every member with an
    /// open connection.
    #[serde(rename = "receiveGroupMessage")]
    ReceiveGroupMessage(GroupMessage),

    /// Reported failure. The connection stays open.
    #[serde(rename = "chatError")]
    ChatError { message: String },

    /// Full snapshot of currently-online user ids, not a diff.
    #[serde(rename = "onlineUsers")]
    OnlineUsers(Vec<UserId>),
}

impl ServerEvent {
    pub fn chat_error(message: impl Into<String>) -> Self {
        Self::ChatError {
            message: message.into(),
        }
    }
}

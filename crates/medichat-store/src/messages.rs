use chrono::Utc;
use tracing::instrument;

use medichat_core::ids::{ConversationId, MessageId, UserId};
use medichat_core::model::Message;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Message persistence. Rows are immutable once created; ordering is by
/// sent_at ascending with message_id breaking ties.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert one message, capturing the generated id and timestamp.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, sender = %sender))]
    pub fn insert(
        &self,
        conversation_id: ConversationId,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let sent_at = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (conversation_id, sender_id, receiver_id, content, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    conversation_id.as_i64(),
                    sender.as_i64(),
                    receiver.as_i64(),
                    content,
                    sent_at,
                ],
            )?;
            Ok(Message {
                message_id: MessageId::new(conn.last_insert_rowid()),
                conversation_id,
                sender_id: sender,
                receiver_id: receiver,
                content: content.to_string(),
                sent_at,
            })
        })
    }

    /// All messages in a conversation, oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list_for_conversation(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, conversation_id, sender_id, receiver_id, content, sent_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY sent_at ASC, message_id ASC",
            )?;
            let mut rows = stmt.query([conversation_id.as_i64()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// Number of persisted messages, for tests and diagnostics.
    pub fn count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        message_id: MessageId::new(row_helpers::get(row, 0, "messages", "message_id")?),
        conversation_id: ConversationId::new(row_helpers::get(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        sender_id: UserId::new(row_helpers::get(row, 2, "messages", "sender_id")?),
        receiver_id: UserId::new(row_helpers::get(row, 3, "messages", "receiver_id")?),
        content: row_helpers::get(row, 4, "messages", "content")?,
        sent_at: row_helpers::get(row, 5, "messages", "sent_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::ConversationRepo;
    use medichat_core::identity::{Identity, Role};

    fn setup() -> (MessageRepo, ConversationId) {
        let db = Database::in_memory().unwrap();
        let conversations = ConversationRepo::new(db.clone());
        let (row, _) = conversations
            .find_or_create(&Identity::new(1, Role::Professional), UserId::new(2))
            .unwrap();
        (MessageRepo::new(db), row.conversation_id)
    }

    #[test]
    fn insert_returns_persisted_row() {
        let (repo, conversation_id) = setup();
        let msg = repo
            .insert(conversation_id, UserId::new(1), UserId::new(2), "Bonjour")
            .unwrap();
        assert_eq!(msg.conversation_id, conversation_id);
        assert_eq!(msg.sender_id.as_i64(), 1);
        assert_eq!(msg.receiver_id.as_i64(), 2);
        assert_eq!(msg.content, "Bonjour");
        assert!(msg.message_id.as_i64() > 0);
        assert!(!msg.sent_at.is_empty());
    }

    #[test]
    fn list_orders_oldest_first() {
        let (repo, conversation_id) = setup();
        let first = repo
            .insert(conversation_id, UserId::new(1), UserId::new(2), "one")
            .unwrap();
        let second = repo
            .insert(conversation_id, UserId::new(2), UserId::new(1), "two")
            .unwrap();

        let listed = repo.list_for_conversation(conversation_id).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].message_id, first.message_id);
        assert_eq!(listed[1].message_id, second.message_id);
    }

    #[test]
    fn equal_timestamps_break_ties_by_id() {
        let (repo, conversation_id) = setup();
        let db = repo.db.clone();
        // Force identical timestamps
        for content in ["a", "b", "c"] {
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO messages (conversation_id, sender_id, receiver_id, content, sent_at)
                     VALUES (?1, 1, 2, ?2, '2026-08-05T10:00:00+00:00')",
                    rusqlite::params![conversation_id.as_i64(), content],
                )?;
                Ok(())
            })
            .unwrap();
        }

        let listed = repo.list_for_conversation(conversation_id).unwrap();
        let contents: Vec<_> = listed.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["a", "b", "c"]);
    }

    #[test]
    fn list_is_scoped_to_the_conversation() {
        let (repo, conversation_id) = setup();
        repo.insert(conversation_id, UserId::new(1), UserId::new(2), "here")
            .unwrap();
        assert!(repo
            .list_for_conversation(ConversationId::new(999))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn count_tracks_inserts() {
        let (repo, conversation_id) = setup();
        assert_eq!(repo.count().unwrap(), 0);
        repo.insert(conversation_id, UserId::new(1), UserId::new(2), "x")
            .unwrap();
        assert_eq!(repo.count().unwrap(), 1);
    }
}

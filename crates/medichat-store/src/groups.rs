use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use medichat_core::ids::{GroupId, MessageId, UserId};
use medichat_core::model::GroupMessage;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize)]
pub struct GroupRow {
    pub group_id: GroupId,
    pub name: String,
    pub creator_id: UserId,
    pub created_at: String,
}

/// Group conversation persistence. Membership is checked at send and read
/// time against the store, never cached.
#[derive(Clone)]
pub struct GroupRepo {
    db: Database,
}

impl GroupRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a group and its membership rows in one transaction. The
    /// creator is always a member; duplicate ids collapse to one row.
    #[instrument(skip(self, member_ids), fields(creator = %creator, members = member_ids.len()))]
    pub fn create(
        &self,
        name: &str,
        creator: UserId,
        member_ids: &[UserId],
    ) -> Result<GroupRow, StoreError> {
        let mut members: BTreeSet<i64> = member_ids.iter().map(UserId::as_i64).collect();
        members.insert(creator.as_i64());

        self.db.with_conn_mut(|conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO group_conversations (name, creator_id, created_at) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, creator.as_i64(), now],
            )?;
            let group_id = GroupId::new(tx.last_insert_rowid());
            for user_id in &members {
                tx.execute(
                    "INSERT INTO group_conversation_members (group_id, user_id) VALUES (?1, ?2)",
                    rusqlite::params![group_id.as_i64(), user_id],
                )?;
            }
            tx.commit()?;
            Ok(GroupRow {
                group_id,
                name: name.to_string(),
                creator_id: creator,
                created_at: now,
            })
        })
    }

    /// All groups the user is a member of.
    #[instrument(skip(self), fields(user = %user))]
    pub fn list_for_user(&self, user: UserId) -> Result<Vec<GroupRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.group_id, g.name, g.creator_id, g.created_at
                 FROM group_conversations g
                 JOIN group_conversation_members m ON g.group_id = m.group_id
                 WHERE m.user_id = ?1
                 ORDER BY g.group_id",
            )?;
            let mut rows = stmt.query([user.as_i64()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_group(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(group_id = %group_id, user = %user))]
    pub fn is_member(&self, group_id: GroupId, user: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM group_conversation_members WHERE group_id = ?1 AND user_id = ?2",
                    [group_id.as_i64(), user.as_i64()],
                    |row| row.get(0),
                )
                .ok();
            Ok(found.is_some())
        })
    }

    /// Membership set for a group, for live fan-out.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub fn members(&self, group_id: GroupId) -> Result<Vec<UserId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM group_conversation_members WHERE group_id = ?1 ORDER BY user_id",
            )?;
            let rows = stmt
                .query_map([group_id.as_i64()], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows.into_iter().map(UserId::new).collect())
        })
    }

    /// Insert one group message, capturing the generated id and timestamp.
    #[instrument(skip(self, content), fields(group_id = %group_id, sender = %sender))]
    pub fn insert_message(
        &self,
        group_id: GroupId,
        sender: UserId,
        content: &str,
    ) -> Result<GroupMessage, StoreError> {
        let sent_at = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO group_messages (group_id, sender_id, content, sent_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![group_id.as_i64(), sender.as_i64(), content, sent_at],
            )?;
            Ok(GroupMessage {
                message_id: MessageId::new(conn.last_insert_rowid()),
                group_id,
                sender_id: sender,
                content: content.to_string(),
                sent_at,
            })
        })
    }

    /// All messages in a group, oldest first.
    #[instrument(skip(self), fields(group_id = %group_id))]
    pub fn list_messages(&self, group_id: GroupId) -> Result<Vec<GroupMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, group_id, sender_id, content, sent_at
                 FROM group_messages
                 WHERE group_id = ?1
                 ORDER BY sent_at ASC, message_id ASC",
            )?;
            let mut rows = stmt.query([group_id.as_i64()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_group_message(row)?);
            }
            Ok(results)
        })
    }

    /// Number of persisted group messages, for tests and diagnostics.
    pub fn message_count(&self) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM group_messages", [], |row| row.get(0))
                .map_err(StoreError::from)
        })
    }
}

fn row_to_group(row: &rusqlite::Row<'_>) -> Result<GroupRow, StoreError> {
    Ok(GroupRow {
        group_id: GroupId::new(row_helpers::get(row, 0, "group_conversations", "group_id")?),
        name: row_helpers::get(row, 1, "group_conversations", "name")?,
        creator_id: UserId::new(row_helpers::get(
            row,
            2,
            "group_conversations",
            "creator_id",
        )?),
        created_at: row_helpers::get(row, 3, "group_conversations", "created_at")?,
    })
}

fn row_to_group_message(row: &rusqlite::Row<'_>) -> Result<GroupMessage, StoreError> {
    Ok(GroupMessage {
        message_id: MessageId::new(row_helpers::get(row, 0, "group_messages", "message_id")?),
        group_id: GroupId::new(row_helpers::get(row, 1, "group_messages", "group_id")?),
        sender_id: UserId::new(row_helpers::get(row, 2, "group_messages", "sender_id")?),
        content: row_helpers::get(row, 3, "group_messages", "content")?,
        sent_at: row_helpers::get(row, 4, "group_messages", "sent_at")?,
    })
}

use chrono::Utc;
use rusqlite::Connection;
use serde::Serialize;
use tracing::instrument;

use medichat_core::identity::{Identity, Role};
use medichat_core::ids::{ConversationId, UserId};

use crate::database::Database;
use crate::error::{is_unique_violation, StoreError};
use crate::row_helpers;

#[derive(Clone, Debug, Serialize)]
pub struct ConversationRow {
    pub conversation_id: ConversationId,
    pub professional_id: UserId,
    pub patient_id: UserId,
    pub archived: bool,
    pub created_at: String,
}

impl ConversationRow {
    pub fn other_participant(&self, user: UserId) -> UserId {
        if self.professional_id == user {
            self.patient_id
        } else {
            self.professional_id
        }
    }
}

/// Resolves a participant pair to its direct conversation, creating the row
/// (and the professional-patient mapping) on first contact.
#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Find the conversation for this pair or create it. The professional-
    /// role participant is always stored as `professional_id`. Returns the
    /// row and whether it was newly created.
    ///
    /// The lookup deliberately ignores the archived flag: a send into an
    /// archived conversation reuses the existing row. A concurrent create
    /// loses the insert race to the active-pair index and re-fetches the
    /// winner's row.
    #[instrument(skip(self), fields(initiator = %initiator.user_id, other = %other))]
    pub fn find_or_create(
        &self,
        initiator: &Identity,
        other: UserId,
    ) -> Result<(ConversationRow, bool), StoreError> {
        let (professional_id, patient_id) = match initiator.role {
            Role::Professional => (initiator.user_id, other),
            Role::Patient => (other, initiator.user_id),
        };

        self.db.with_conn_mut(|conn| {
            if let Some(row) = find_pair(conn, initiator.user_id, other)? {
                return Ok((row, false));
            }

            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                "INSERT INTO conversations (professional_id, patient_id, archived, created_at)
                 VALUES (?1, ?2, 0, ?3)",
                rusqlite::params![professional_id.as_i64(), patient_id.as_i64(), now],
            );
            match inserted {
                Ok(_) => {
                    let conversation_id = ConversationId::new(tx.last_insert_rowid());
                    tx.execute(
                        "INSERT OR IGNORE INTO professional_patient_map (professional_id, patient_id)
                         VALUES (?1, ?2)",
                        rusqlite::params![professional_id.as_i64(), patient_id.as_i64()],
                    )?;
                    tx.commit()?;
                    Ok((
                        ConversationRow {
                            conversation_id,
                            professional_id,
                            patient_id,
                            archived: false,
                            created_at: now,
                        },
                        true,
                    ))
                }
                Err(e) if is_unique_violation(&e) => {
                    drop(tx);
                    find_pair(conn, initiator.user_id, other)?
                        .map(|row| (row, false))
                        .ok_or_else(|| StoreError::Database(e.to_string()))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Get a conversation by id.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn get(&self, id: ConversationId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, professional_id, patient_id, archived, created_at
                 FROM conversations WHERE conversation_id = ?1",
            )?;
            let mut rows = stmt.query([id.as_i64()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// All non-archived conversations the user participates in.
    #[instrument(skip(self), fields(user = %user))]
    pub fn list_for_user(&self, user: UserId) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT conversation_id, professional_id, patient_id, archived, created_at
                 FROM conversations
                 WHERE (professional_id = ?1 OR patient_id = ?1) AND archived = 0
                 ORDER BY conversation_id",
            )?;
            let mut rows = stmt.query([user.as_i64()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    /// Whether the user is one of the two participants. Authorization
    /// checks run against the store on every call, not a cache.
    #[instrument(skip(self), fields(conversation_id = %id, user = %user))]
    pub fn is_participant(&self, id: ConversationId, user: UserId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM conversations
                     WHERE conversation_id = ?1 AND (professional_id = ?2 OR patient_id = ?2)",
                    [id.as_i64(), user.as_i64()],
                    |row| row.get(0),
                )
                .ok();
            Ok(found.is_some())
        })
    }

    /// Archive a conversation. Archived rows are excluded from listing and
    /// from new-conversation uniqueness, but remain for history.
    #[instrument(skip(self), fields(conversation_id = %id))]
    pub fn archive(&self, id: ConversationId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE conversations SET archived = 1 WHERE conversation_id = ?1",
                [id.as_i64()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }
}

fn find_pair(
    conn: &Connection,
    a: UserId,
    b: UserId,
) -> Result<Option<ConversationRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, professional_id, patient_id, archived, created_at
         FROM conversations
         WHERE (professional_id = ?1 AND patient_id = ?2)
            OR (professional_id = ?2 AND patient_id = ?1)
         ORDER BY conversation_id
         LIMIT 1",
    )?;
    let mut rows = stmt.query([a.as_i64(), b.as_i64()])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_conversation(row)?)),
        None => Ok(None),
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    Ok(ConversationRow {
        conversation_id: ConversationId::new(row_helpers::get(
            row,
            0,
            "conversations",
            "conversation_id",
        )?),
        professional_id: UserId::new(row_helpers::get(
            row,
            1,
            "conversations",
            "professional_id",
        )?),
        patient_id: UserId::new(row_helpers::get(row, 2, "conversations", "patient_id")?),
        archived: row_helpers::get_flag(row, 3, "conversations", "archived")?,
        created_at: row_helpers::get(row, 4, "conversations", "created_at")?,
    })
}

/// SQL DDL for the chat subsystem's slice of the portal database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    conversation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    professional_id INTEGER NOT NULL,
    patient_id INTEGER NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- At most one non-archived conversation per pair. A concurrent
-- find-or-create loses the insert race here and re-fetches instead of
-- duplicating the row. Archived rows are kept for history and exempt.
CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_active_pair
    ON conversations(professional_id, patient_id) WHERE archived = 0;

CREATE TABLE IF NOT EXISTS professional_patient_map (
    professional_id INTEGER NOT NULL,
    patient_id INTEGER NOT NULL,
    PRIMARY KEY (professional_id, patient_id)
);

CREATE TABLE IF NOT EXISTS messages (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER NOT NULL REFERENCES conversations(conversation_id),
    sender_id INTEGER NOT NULL,
    receiver_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    sent_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_conversations (
    group_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    creator_id INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_conversation_members (
    group_id INTEGER NOT NULL REFERENCES group_conversations(group_id),
    user_id INTEGER NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS group_messages (
    message_id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL REFERENCES group_conversations(group_id),
    sender_id INTEGER NOT NULL,
    content TEXT NOT NULL,
    sent_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id, sent_at, message_id);
CREATE INDEX IF NOT EXISTS idx_conversations_professional
    ON conversations(professional_id);
CREATE INDEX IF NOT EXISTS idx_conversations_patient
    ON conversations(patient_id);
CREATE INDEX IF NOT EXISTS idx_group_members_user
    ON group_conversation_members(user_id);
CREATE INDEX IF NOT EXISTS idx_group_messages_group
    ON group_messages(group_id, sent_at, message_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

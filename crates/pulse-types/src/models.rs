use serde::{Deserialize, Serialize};

/// All timestamps in Pulse are unix seconds. They double as delta cursors:
/// a client holding cursor `t` is owed everything with a timestamp
/// strictly greater than `t`.
pub type Timestamp = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    File,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub is_online: bool,
    /// Monotonically non-decreasing; bumped on every poll, stream open,
    /// and login.
    pub last_seen: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
    pub title: String,
    /// Bumped inside the same transaction as every message insert, so both
    /// delivery paths can cheaply decide whether a chat needs re-fetching.
    pub updated_at: Timestamp,
    pub created_at: Timestamp,
}

/// A user's visibility into a chat. No live membership row means no
/// delivery, full stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub chat_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub last_read_message_id: Option<i64>,
    /// Per-user soft delete. Set means the chat is hidden from this user
    /// and surfaces once in `deleted_chats[]` on their next global poll.
    pub deleted_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// AUTOINCREMENT rowid — monotonically increasing, usable as the
    /// within-chat delivery cursor.
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub body: String,
    pub file_ref: Option<String>,
    pub sent_at: Timestamp,
    pub edited: bool,
    pub deleted: bool,
}

/// Per-recipient read-receipt ledger. One row per (message, member except
/// sender), created transactionally with the message and only ever
/// mutated, never recreated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStatus {
    pub message_id: i64,
    pub user_id: i64,
    pub delivered: bool,
    pub delivered_at: Option<Timestamp>,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
}

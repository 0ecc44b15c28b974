/// Database row types — these map directly to SQLite rows.
/// Distinct from pulse-types API models to keep the DB layer independent.

pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub password: String,
    pub is_online: bool,
    pub last_seen: i64,
    pub created_at: i64,
}

pub struct ChatRow {
    pub id: i64,
    pub kind: String,
    pub title: String,
    pub updated_at: i64,
    pub created_at: i64,
}

pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: String,
    pub body: String,
    pub file_ref: Option<String>,
    pub sent_at: i64,
    pub edited: bool,
    pub deleted: bool,
}

pub struct ReadReceiptRow {
    pub message_id: i64,
    pub read_at: i64,
}

pub struct PeerStatusRow {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: i64,
}

pub struct UnreadCountRow {
    pub chat_id: i64,
    pub unread: i64,
}

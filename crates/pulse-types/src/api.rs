use serde::{Deserialize, Serialize};

use crate::models::{MessageKind, Timestamp};

// -- JWT Claims --

/// JWT claims shared across the REST middleware and the stream endpoint.
/// Canonical definition lives here in pulse-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: i64,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: i64,
    pub username: String,
    pub token: String,
}

// -- Poll / delta payloads --

/// A message as the wire sees it, annotated with whether the requesting
/// user authored it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub chat_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub body: String,
    pub file_ref: Option<String>,
    pub sent_at: Timestamp,
    pub edited: bool,
    pub deleted: bool,
    pub is_own: bool,
}

/// A read-receipt flip on one of the requester's own sent messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadUpdate {
    pub message_id: i64,
    pub is_read: bool,
    pub read_at: Timestamp,
}

/// An online/offline transition of a relevant peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub user_id: i64,
    pub is_online: bool,
    pub last_seen: Timestamp,
}

/// Long-poll snapshot. Always a full set of independent, possibly-empty
/// lists — "no changes" is a 200 with everything empty, never an error.
/// Scoped polls fill `messages`/`read_updates`/`chat_deleted`; global polls
/// fill the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub success: bool,
    /// Next cursor for the client: max(server now, newest observed change).
    pub timestamp: Timestamp,
    pub messages: Vec<MessageView>,
    pub read_updates: Vec<ReadUpdate>,
    pub status_updates: Vec<StatusUpdate>,
    pub deleted_chats: Vec<i64>,
    pub valid_chats: Vec<i64>,
    pub chat_updates: Vec<i64>,
    pub chat_deleted: bool,
}

impl PollResponse {
    pub fn empty(timestamp: Timestamp) -> Self {
        Self {
            success: true,
            timestamp,
            messages: Vec::new(),
            read_updates: Vec::new(),
            status_updates: Vec::new(),
            deleted_chats: Vec::new(),
            valid_chats: Vec::new(),
            chat_updates: Vec::new(),
            chat_deleted: false,
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default = "default_kind")]
    pub kind: MessageKind,
    pub body: String,
    pub file_ref: Option<String>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub up_to_message_id: i64,
}

// -- Errors --

/// Structured error body. Clients only ever expect JSON or event-stream
/// framing; no endpoint returns HTML.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
}

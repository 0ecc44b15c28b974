use serde::{Deserialize, Serialize};

use crate::api::MessageView;
use crate::models::{ChatKind, Timestamp};

/// SSE event names. A leading oversized comment frame and periodic
/// comment-only keep-alives are also part of the wire contract, but those
/// are framing, not named events.
pub const EVENT_INIT: &str = "init";
pub const EVENT_UPDATES: &str = "updates";
pub const EVENT_CLOSE: &str = "close";

/// One chat in the `init` snapshot that seeds a fresh stream, so the loop
/// itself only needs to push deltas afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: i64,
    pub kind: ChatKind,
    pub title: String,
    pub updated_at: Timestamp,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPayload {
    pub chats: Vec<ChatSummary>,
}

/// A typed delta record inside an `updates` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateRecord {
    /// A new message from someone else. The user's own messages are never
    /// pushed — the sender already has them from the send response.
    NewMessage { message: MessageView },

    /// A peer came online or its last_seen advanced.
    OnlineStatus {
        user_id: i64,
        is_online: bool,
        last_seen: Timestamp,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePayload {
    pub reason: String,
}

/// A fully-parsed stream event as the client reconciliation layer consumes
/// it. The server emits these as named SSE events with JSON data.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Init(InitPayload),
    Updates(Vec<UpdateRecord>),
    Close(ClosePayload),
}

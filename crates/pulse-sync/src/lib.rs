//! The cursor-based change query shared by both delivery transports.
//!
//! The long-poll handler and the SSE push loop are two racing observers of
//! the same store. Neither holds any per-user subscription state: every
//! call re-derives "what changed since `cursor`" from SQLite, so any server
//! process can service any user's next poll or stream tick. Redelivery
//! across the two paths is expected; clients dedup by message id.

pub mod changes;
pub mod stream;

pub use changes::{ChatSnapshot, GlobalSnapshot, global_changes, scoped_changes};
pub use stream::{init_snapshot, stream_tick};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChangeError {
    /// The requester has no live membership in the requested chat. The
    /// result carries no data — never partial, never another user's.
    #[error("no membership in the requested chat")]
    Forbidden,

    /// The requested chat was hard-deleted. Short-circuits the query so
    /// the client can drop the chat instead of treating this as a failure.
    #[error("chat no longer exists")]
    ChatGone,

    #[error("storage unavailable: {0}")]
    Storage(#[from] anyhow::Error),
}

/// Clients supply their own cursor, which only affects what is redelivered
/// to them — but corrupt values are clamped to [0, now] so a garbage
/// cursor can't request "everything since the year 3000" or overflow math.
pub fn clamp_cursor(cursor: i64, now: i64) -> i64 {
    cursor.clamp(0, now)
}

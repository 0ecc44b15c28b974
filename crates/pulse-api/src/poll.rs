use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use tracing::error;

use pulse_sync::{ChangeError, global_changes, scoped_changes};
use pulse_types::api::{Claims, PollResponse};

use crate::auth::AppState;
use crate::error::{ApiError, Query};

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    /// Cursor: unix timestamp of the last snapshot the client merged.
    /// 0 (the default) means "everything".
    #[serde(default)]
    pub last_update: i64,
    /// Scope the poll to one open conversation.
    pub chat_id: Option<i64>,
}

/// Single-shot long-poll. Computes the delta and returns immediately —
/// there is no server-side blocking; re-issue timing is the client's job.
/// Doubles as the presence heartbeat.
pub async fn poll(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<PollQuery>,
) -> Result<Json<PollResponse>, ApiError> {
    if let Some(chat_id) = query.chat_id {
        if chat_id <= 0 {
            return Err(ApiError::BadRequest("invalid chat_id".into()));
        }
    }

    let user_id = claims.sub;
    let now = chrono::Utc::now().timestamp();

    // Run blocking DB work off the async runtime
    let db = state.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<PollResponse, ChangeError> {
        db.db.touch_presence(user_id, now)?;

        match query.chat_id {
            Some(chat_id) => match scoped_changes(&db.db, user_id, chat_id, query.last_update, now) {
                Ok(snap) => Ok(PollResponse {
                    messages: snap.messages,
                    read_updates: snap.read_updates,
                    ..PollResponse::empty(snap.timestamp)
                }),
                // Not an error on the wire: the client drops the chat.
                Err(ChangeError::ChatGone) => Ok(PollResponse {
                    chat_deleted: true,
                    ..PollResponse::empty(now)
                }),
                Err(e) => Err(e),
            },
            None => {
                let snap = global_changes(&db.db, user_id, query.last_update, now)?;
                Ok(PollResponse {
                    status_updates: snap.status_updates,
                    deleted_chats: snap.deleted_chats,
                    valid_chats: snap.valid_chats,
                    chat_updates: snap.chat_updates,
                    ..PollResponse::empty(snap.timestamp)
                })
            }
        }
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("join error: {}", e))
    })?;

    result.map(Json).map_err(ApiError::from)
}

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use pulse_sync::ChangeError;
use pulse_types::api::{Claims, MarkReadRequest, MessageView, SendMessageRequest};
use pulse_types::models::MessageKind;

use crate::auth::AppState;
use crate::error::ApiError;

/// Post a message. The insert, the chat's updated_at bump, and the
/// per-recipient status rows happen in one transaction in the db layer, so
/// pollers never observe a message without its receipt ledger.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.body.is_empty() && req.file_ref.is_none() {
        return Err(ApiError::BadRequest("empty message".into()));
    }

    let user_id = claims.sub;
    let now = chrono::Utc::now().timestamp();

    let db = state.clone();
    let view = tokio::task::spawn_blocking(move || -> Result<MessageView, ChangeError> {
        if !db.db.chat_exists(chat_id)? {
            return Err(ChangeError::ChatGone);
        }
        if !db.db.is_member(chat_id, user_id)? {
            return Err(ChangeError::Forbidden);
        }

        let id = db.db.send_message(
            chat_id,
            user_id,
            kind_str(req.kind),
            &req.body,
            req.file_ref.as_deref(),
            now,
        )?;

        Ok(MessageView {
            id,
            chat_id,
            sender_id: user_id,
            kind: req.kind,
            body: req.body,
            file_ref: req.file_ref,
            sent_at: now,
            edited: false,
            deleted: false,
            is_own: true,
        })
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("join error: {}", e))
    })??;

    Ok((StatusCode::CREATED, Json(view)))
}

/// Explicit mark-as-read for everything in the chat up to a message id,
/// for clients that render without issuing a scoped poll.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(chat_id): Path<i64>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<MarkReadRequest>,
) -> Result<StatusCode, ApiError> {
    if req.up_to_message_id <= 0 {
        return Err(ApiError::BadRequest("invalid message id".into()));
    }

    let user_id = claims.sub;
    let now = chrono::Utc::now().timestamp();

    let db = state.clone();
    tokio::task::spawn_blocking(move || -> Result<(), ChangeError> {
        if !db.db.is_member(chat_id, user_id)? {
            return Err(ChangeError::Forbidden);
        }
        db.db.mark_read_up_to(chat_id, user_id, req.up_to_message_id, now)?;
        Ok(())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Internal(anyhow::anyhow!("join error: {}", e))
    })??;

    Ok(StatusCode::NO_CONTENT)
}

fn kind_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::File => "file",
        MessageKind::System => "system",
    }
}

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    Extension,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pulse_types::api::Claims;
use pulse_types::events::{ClosePayload, EVENT_CLOSE, EVENT_INIT, EVENT_UPDATES, InitPayload};

use crate::auth::AppState;
use crate::error::ApiError;

/// Tick cadence for delta checks.
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Comment-only keep-alive cadence, emitted regardless of data activity so
/// intermediary proxies don't kill an idle connection.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Consecutive tick failures tolerated before the loop gives up. A single
/// transient storage hiccup is logged and skipped, never connection-fatal.
pub const MAX_TICK_FAILURES: u32 = 5;

/// Size of the leading comment frame. Some proxies buffer small SSE
/// responses; an oversized first frame flushes them.
const PADDING_BYTES: usize = 2048;

/// Tracks open push loops so they can be revoked server-side (forced
/// logout). Keyed by user, then by per-connection id so two tabs of the
/// same user don't cancel each other on normal close.
#[derive(Clone, Default)]
pub struct StreamRegistry {
    inner: Arc<RwLock<HashMap<i64, HashMap<Uuid, CancellationToken>>>>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: i64) -> (Uuid, CancellationToken) {
        let conn_id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.inner
            .write()
            .expect("stream registry lock poisoned")
            .entry(user_id)
            .or_default()
            .insert(conn_id, token.clone());
        (conn_id, token)
    }

    pub fn unregister(&self, user_id: i64, conn_id: Uuid) {
        let mut map = self.inner.write().expect("stream registry lock poisoned");
        if let Some(conns) = map.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                map.remove(&user_id);
            }
        }
    }

    /// Cancel every open stream for a user. Each loop notices on its next
    /// tick and emits a terminal `close` event.
    pub fn revoke_user(&self, user_id: i64) {
        let mut map = self.inner.write().expect("stream registry lock poisoned");
        if let Some(conns) = map.remove(&user_id) {
            for (_, token) in conns {
                token.cancel();
            }
        }
    }

    pub fn open_streams(&self, user_id: i64) -> usize {
        self.inner
            .read()
            .expect("stream registry lock poisoned")
            .get(&user_id)
            .map_or(0, |c| c.len())
    }
}

/// Unregisters the connection when the response body is dropped — which is
/// also how client disconnect ends the loop: the hosting layer drops the
/// stream, and no close frame is emitted.
struct StreamGuard {
    registry: StreamRegistry,
    user_id: i64,
    conn_id: Uuid,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.registry.unregister(self.user_id, self.conn_id);
        debug!("stream {} for user {} closed", self.conn_id, self.user_id);
    }
}

/// Open a push loop for the authenticated user.
///
/// Framing: a ~2KB comment padding frame, an `init` event seeding the full
/// chat list with unread counts, then `updates` events whenever a 2s tick
/// finds a non-empty delta. Comment keep-alives go out every 30s
/// independently of data. Each tick is its own set of short-lived reads;
/// no transaction spans ticks, and loops for different users share nothing
/// in-process.
pub async fn stream(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user_id = claims.sub;
    let opened_at = chrono::Utc::now().timestamp();

    // Opening the stream is a heartbeat too.
    let db = state.clone();
    tokio::task::spawn_blocking(move || db.db.touch_presence(user_id, opened_at))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("join error: {}", e)))??;

    let db = state.clone();
    let chats = tokio::task::spawn_blocking(move || pulse_sync::init_snapshot(&db.db, user_id))
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("join error: {}", e)))?
        .map_err(ApiError::from)?;

    let (conn_id, token) = state.streams.register(user_id);
    let guard = StreamGuard {
        registry: state.streams.clone(),
        user_id,
        conn_id,
    };
    info!("{} ({}) opened stream {}", claims.username, user_id, conn_id);

    let stream = async_stream::stream! {
        let _guard = guard;

        yield Ok(Event::default().comment(" ".repeat(PADDING_BYTES)));

        let init = serde_json::to_string(&InitPayload { chats })
            .unwrap_or_else(|_| "{}".into());
        yield Ok(Event::default().event(EVENT_INIT).data(init));

        let mut since = opened_at;
        let mut failures: u32 = 0;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        // interval fires immediately; the init event already covers now
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    yield Ok(close_event("revoked"));
                    break;
                }
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    let db = state.clone();
                    let tick = tokio::task::spawn_blocking(move || {
                        db.db.touch_presence(user_id, now)?;
                        pulse_sync::stream_tick(&db.db, user_id, since)
                    })
                    .await;

                    match tick {
                        Ok(Ok(records)) => {
                            failures = 0;
                            if !records.is_empty() {
                                let data = serde_json::to_string(&records)
                                    .unwrap_or_else(|_| "[]".into());
                                yield Ok(Event::default().event(EVENT_UPDATES).data(data));
                            }
                            since = now;
                        }
                        Ok(Err(e)) => {
                            failures += 1;
                            warn!(
                                "stream tick failed for user {} ({}/{}): {}",
                                user_id, failures, MAX_TICK_FAILURES, e
                            );
                            if failures >= MAX_TICK_FAILURES {
                                yield Ok(close_event("storage unavailable"));
                                break;
                            }
                        }
                        Err(e) => {
                            failures += 1;
                            error!("stream tick join error for user {}: {}", user_id, e);
                            if failures >= MAX_TICK_FAILURES {
                                yield Ok(close_event("internal error"));
                                break;
                            }
                        }
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

fn close_event(reason: &str) -> Event {
    let data = serde_json::to_string(&ClosePayload {
        reason: reason.to_string(),
    })
    .unwrap_or_else(|_| "{}".into());
    Event::default().event(EVENT_CLOSE).data(data)
}

use std::collections::{BTreeMap, HashMap, HashSet};

use pulse_types::api::{MessageView, PollResponse, StatusUpdate};
use pulse_types::events::{StreamEvent, UpdateRecord};

/// Something the embedding UI should do in response to merged updates.
/// The reconciler itself performs no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Fire a desktop notification / sound for a foreign message that
    /// arrived outside the active, visible chat. Emitted at most once per
    /// message id.
    Notify { chat_id: i64, message_id: i64 },

    /// The chat's list preview is stale; refetch it.
    RefreshChat(i64),

    /// The chat is gone (deleted, or access lost); drop it from the UI.
    ChatRemoved(i64),

    /// The chat the user had open is gone; reset the active view.
    ResetActiveView,
}

#[derive(Debug, Clone, Default)]
pub struct ChatView {
    pub title: String,
    pub updated_at: i64,
    pub unread_count: i64,
    /// Ordered by (sent_at, id); merged idempotently by id.
    pub messages: Vec<MessageView>,
    /// Own message ids known to have been read by a recipient.
    pub read_ids: HashSet<i64>,
}

/// Local mirror of the user's chat state, fed by both delivery paths.
#[derive(Debug, Default)]
pub struct ClientState {
    chats: BTreeMap<i64, ChatView>,
    /// Every message id ever merged. This is both the dedup guard that
    /// makes double delivery safe and the exactly-once guard for
    /// notification side effects.
    seen: HashSet<i64>,
    cursor: i64,
    active_chat: Option<i64>,
    visible: bool,
    peers: HashMap<i64, StatusUpdate>,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            visible: true,
            ..Self::default()
        }
    }

    /// The timestamp to send as `last_update` on the next poll. Advances
    /// monotonically to the max observed from either path.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn set_active_chat(&mut self, chat_id: Option<i64>) {
        self.active_chat = chat_id;
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    pub fn chat(&self, chat_id: i64) -> Option<&ChatView> {
        self.chats.get(&chat_id)
    }

    pub fn chat_ids(&self) -> Vec<i64> {
        self.chats.keys().copied().collect()
    }

    pub fn peer_online(&self, user_id: i64) -> Option<bool> {
        self.peers.get(&user_id).map(|s| s.is_online)
    }

    /// Merge one long-poll response. `scope` is the `chat_id` the poll was
    /// issued with, if any — the response itself doesn't repeat it.
    pub fn apply_poll(&mut self, scope: Option<i64>, resp: &PollResponse) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cursor = self.cursor.max(resp.timestamp);

        if resp.chat_deleted {
            if let Some(chat_id) = scope {
                effects.extend(self.remove_chat(chat_id));
            }
            // ChatGone short-circuits server-side; nothing else to merge.
            return effects;
        }

        for msg in &resp.messages {
            self.merge_message(msg.clone(), &mut effects);
        }

        if let Some(chat_id) = scope {
            let view = self.chats.entry(chat_id).or_default();
            for ru in &resp.read_updates {
                if ru.is_read {
                    view.read_ids.insert(ru.message_id);
                }
            }
        }

        for su in &resp.status_updates {
            self.merge_status(su.clone());
        }

        if scope.is_none() {
            // Lost access is detected by set difference against the full
            // valid list, not by an explicit removal event.
            let valid: HashSet<i64> = resp.valid_chats.iter().copied().collect();
            let lost: Vec<i64> = self
                .chats
                .keys()
                .copied()
                .filter(|id| !valid.contains(id))
                .collect();
            for chat_id in lost {
                effects.extend(self.remove_chat(chat_id));
            }
        }

        for &chat_id in &resp.deleted_chats {
            effects.extend(self.remove_chat(chat_id));
        }

        for &chat_id in &resp.chat_updates {
            effects.push(Effect::RefreshChat(chat_id));
        }

        effects
    }

    /// Merge one pushed stream event.
    pub fn apply_stream(&mut self, event: &StreamEvent) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            StreamEvent::Init(init) => {
                for summary in &init.chats {
                    let view = self.chats.entry(summary.chat_id).or_default();
                    view.title = summary.title.clone();
                    view.updated_at = view.updated_at.max(summary.updated_at);
                    view.unread_count = summary.unread_count;
                }
                self.cursor = self
                    .cursor
                    .max(init.chats.iter().map(|c| c.updated_at).max().unwrap_or(0));
            }
            StreamEvent::Updates(records) => {
                for record in records {
                    match record {
                        UpdateRecord::NewMessage { message } => {
                            self.cursor = self.cursor.max(message.sent_at);
                            self.merge_message(message.clone(), &mut effects);
                        }
                        UpdateRecord::OnlineStatus {
                            user_id,
                            is_online,
                            last_seen,
                        } => {
                            self.cursor = self.cursor.max(*last_seen);
                            self.merge_status(StatusUpdate {
                                user_id: *user_id,
                                is_online: *is_online,
                                last_seen: *last_seen,
                            });
                        }
                    }
                }
            }
            // Reconnection is the transport loop's job (see Backoff); the
            // merged state is already consistent.
            StreamEvent::Close(_) => {}
        }
        effects
    }

    /// Idempotent insert: a message id already merged from the other
    /// delivery path is discarded.
    fn merge_message(&mut self, msg: MessageView, effects: &mut Vec<Effect>) {
        if !self.seen.insert(msg.id) {
            return;
        }

        let notify = !msg.is_own
            && (self.active_chat != Some(msg.chat_id) || !self.visible);

        let view = self.chats.entry(msg.chat_id).or_default();
        view.updated_at = view.updated_at.max(msg.sent_at);
        if notify {
            view.unread_count += 1;
            effects.push(Effect::Notify {
                chat_id: msg.chat_id,
                message_id: msg.id,
            });
        }

        let pos = view
            .messages
            .partition_point(|m| (m.sent_at, m.id) <= (msg.sent_at, msg.id));
        view.messages.insert(pos, msg);
    }

    fn merge_status(&mut self, status: StatusUpdate) {
        match self.peers.get(&status.user_id) {
            // last_seen is monotonic server-side; ignore stale reordering
            // between the two paths.
            Some(existing) if existing.last_seen > status.last_seen => {}
            _ => {
                self.peers.insert(status.user_id, status);
            }
        }
    }

    fn remove_chat(&mut self, chat_id: i64) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.chats.remove(&chat_id).is_some() {
            effects.push(Effect::ChatRemoved(chat_id));
        }
        if self.active_chat == Some(chat_id) {
            self.active_chat = None;
            effects.push(Effect::ResetActiveView);
        }
        effects
    }
}

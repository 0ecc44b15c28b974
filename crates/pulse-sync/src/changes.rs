use pulse_db::Database;
use pulse_db::models::MessageRow;
use pulse_types::api::{MessageView, ReadUpdate, StatusUpdate};
use pulse_types::models::MessageKind;
use tracing::warn;

use crate::{ChangeError, clamp_cursor};

/// Delta for one open chat: new messages plus read-receipt flips on the
/// requester's own sent messages.
#[derive(Debug, Clone)]
pub struct ChatSnapshot {
    pub messages: Vec<MessageView>,
    pub read_updates: Vec<ReadUpdate>,
    pub timestamp: i64,
}

/// Delta for the chat list as a whole. Independent, possibly-empty lists —
/// "nothing changed" is a valid snapshot, not an error.
#[derive(Debug, Clone)]
pub struct GlobalSnapshot {
    pub valid_chats: Vec<i64>,
    pub deleted_chats: Vec<i64>,
    pub status_updates: Vec<StatusUpdate>,
    pub chat_updates: Vec<i64>,
    pub timestamp: i64,
}

/// Changes in one chat since `cursor`, for `user_id`.
///
/// Side effect: every returned message authored by someone else is marked
/// delivered and read — receiving a scoped poll response *is* reading.
/// All comparisons are strict `>` so the boundary item is never redelivered
/// to a client that polls with the previous response's timestamp.
pub fn scoped_changes(
    db: &Database,
    user_id: i64,
    chat_id: i64,
    cursor: i64,
    now: i64,
) -> Result<ChatSnapshot, ChangeError> {
    let cursor = clamp_cursor(cursor, now);

    // ChatGone short-circuits: no partial delta is merged with it.
    if !db.chat_exists(chat_id)? {
        return Err(ChangeError::ChatGone);
    }
    if !db.is_member(chat_id, user_id)? {
        return Err(ChangeError::Forbidden);
    }

    let rows = db.messages_since(chat_id, cursor)?;

    let foreign: Vec<i64> = rows
        .iter()
        .filter(|r| r.sender_id != user_id)
        .map(|r| r.id)
        .collect();
    db.mark_messages_read(user_id, &foreign, now)?;

    let receipts = db.read_receipts_since(chat_id, user_id, cursor)?;

    let mut timestamp = now;
    for r in &rows {
        timestamp = timestamp.max(r.sent_at);
    }
    for r in &receipts {
        timestamp = timestamp.max(r.read_at);
    }

    Ok(ChatSnapshot {
        messages: rows.into_iter().map(|r| message_view(r, user_id)).collect(),
        read_updates: receipts
            .into_iter()
            .map(|r| ReadUpdate {
                message_id: r.message_id,
                is_read: true,
                read_at: r.read_at,
            })
            .collect(),
        timestamp,
    })
}

/// Changes across the user's whole chat list since `cursor`.
///
/// `valid_chats` is always the full current list — removed access is
/// detected client-side by set difference, there is no explicit "removed"
/// event. `deleted_chats` carries per-user soft deletes, `status_updates`
/// peer presence transitions, `chat_updates` chats whose list preview went
/// stale and should be refetched.
pub fn global_changes(
    db: &Database,
    user_id: i64,
    cursor: i64,
    now: i64,
) -> Result<GlobalSnapshot, ChangeError> {
    let cursor = clamp_cursor(cursor, now);

    let valid_chats = db.chat_ids_for_user(user_id)?;
    let deleted = db.soft_deleted_chats_since(user_id, cursor)?;
    let peers = db.peers_seen_since(user_id, cursor)?;
    let updated = db.chats_updated_since(user_id, cursor)?;

    // Racing sends can land activity timestamps past the captured `now`;
    // the returned cursor must cover everything this snapshot reports.
    let mut timestamp = now;
    for p in &peers {
        timestamp = timestamp.max(p.last_seen);
    }
    for &(_, at) in updated.iter().chain(&deleted) {
        timestamp = timestamp.max(at);
    }

    Ok(GlobalSnapshot {
        valid_chats,
        deleted_chats: deleted.into_iter().map(|(id, _)| id).collect(),
        status_updates: peers
            .into_iter()
            .map(|p| StatusUpdate {
                user_id: p.user_id,
                is_online: p.is_online,
                last_seen: p.last_seen,
            })
            .collect(),
        chat_updates: updated.into_iter().map(|(id, _)| id).collect(),
        timestamp,
    })
}

pub(crate) fn message_view(row: MessageRow, user_id: i64) -> MessageView {
    MessageView {
        id: row.id,
        chat_id: row.chat_id,
        sender_id: row.sender_id,
        kind: parse_kind(&row.kind, row.id),
        body: row.body,
        file_ref: row.file_ref,
        sent_at: row.sent_at,
        edited: row.edited,
        deleted: row.deleted,
        is_own: row.sender_id == user_id,
    }
}

fn parse_kind(kind: &str, message_id: i64) -> MessageKind {
    match kind {
        "text" => MessageKind::Text,
        "file" => MessageKind::File,
        "system" => MessageKind::System,
        other => {
            warn!("Corrupt message kind '{}' on message {}", other, message_id);
            MessageKind::Text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_db::Database;

    fn setup() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "hash").unwrap();
        let bob = db.create_user("bob", "hash").unwrap();
        let chat = db.create_chat("private", "alice & bob", 100).unwrap();
        db.add_member(chat, alice, "owner").unwrap();
        db.add_member(chat, bob, "member").unwrap();
        (db, alice, bob, chat)
    }

    #[test]
    fn messages_returned_in_order_and_cursor_excludes_boundary() {
        let (db, alice, bob, chat) = setup();
        let m1 = db.send_message(chat, alice, "text", "one", None, 1000).unwrap();
        let m2 = db.send_message(chat, alice, "text", "two", None, 2000).unwrap();
        let m3 = db.send_message(chat, alice, "text", "three", None, 3000).unwrap();

        let snap = scoped_changes(&db, bob, chat, 0, 5000).unwrap();
        let ids: Vec<i64> = snap.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1, m2, m3]);
        assert!(snap.messages.iter().all(|m| !m.is_own));

        // cursor = t2 returns only m3; t2 itself is the boundary
        let snap = scoped_changes(&db, bob, chat, 2000, 5000).unwrap();
        let ids: Vec<i64> = snap.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m3]);
    }

    #[test]
    fn cursor_monotonicity_prevents_redelivery() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "one", None, 1000).unwrap();

        let first = scoped_changes(&db, bob, chat, 0, 2000).unwrap();
        assert_eq!(first.messages.len(), 1);
        assert!(first.timestamp >= 2000);

        // Polling again with the advanced cursor returns nothing
        let second = scoped_changes(&db, bob, chat, first.timestamp, 3000).unwrap();
        assert!(second.messages.is_empty());
    }

    #[test]
    fn scoped_poll_marks_foreign_messages_read_and_sender_sees_receipt() {
        let (db, alice, bob, chat) = setup();
        let mid = db.send_message(chat, alice, "text", "hi", None, 1000).unwrap();

        // Recipient polls the open chat: message delivered, read as a side effect
        let snap = scoped_changes(&db, bob, chat, 0, 2000).unwrap();
        assert_eq!(snap.messages.len(), 1);

        // Sender polls with a cursor before the read time
        let snap = scoped_changes(&db, alice, chat, 1500, 3000).unwrap();
        assert!(snap.messages.is_empty() || snap.messages.iter().all(|m| m.is_own));
        assert_eq!(snap.read_updates.len(), 1);
        assert_eq!(snap.read_updates[0].message_id, mid);
        assert!(snap.read_updates[0].is_read);
        assert_eq!(snap.read_updates[0].read_at, 2000);
    }

    #[test]
    fn own_messages_are_not_marked_read() {
        let (db, alice, _, chat) = setup();
        db.send_message(chat, alice, "text", "hi", None, 1000).unwrap();

        // Sender polls their own chat — must not flip their own receipt rows
        let snap = scoped_changes(&db, alice, chat, 0, 2000).unwrap();
        assert_eq!(snap.messages.len(), 1);
        assert!(snap.messages[0].is_own);
        assert!(snap.read_updates.is_empty());
    }

    #[test]
    fn hard_deleted_chat_signals_chat_gone() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "hi", None, 1000).unwrap();
        db.hard_delete_chat(chat).unwrap();

        match scoped_changes(&db, bob, chat, 0, 2000) {
            Err(ChangeError::ChatGone) => {}
            other => panic!("expected ChatGone, got {:?}", other.map(|s| s.messages)),
        }

        // Other members see it drop out of valid_chats
        let global = global_changes(&db, alice, 0, 2000).unwrap();
        assert!(!global.valid_chats.contains(&chat));
    }

    #[test]
    fn non_member_gets_forbidden_not_content() {
        let (db, alice, _, chat) = setup();
        let eve = db.create_user("eve", "hash").unwrap();
        db.send_message(chat, alice, "text", "secret", None, 1000).unwrap();

        match scoped_changes(&db, eve, chat, 0, 2000) {
            Err(ChangeError::Forbidden) => {}
            other => panic!("expected Forbidden, got {:?}", other.map(|s| s.messages.len())),
        }
    }

    #[test]
    fn soft_deleted_membership_is_forbidden_and_listed_once() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "hi", None, 1000).unwrap();
        db.soft_delete_chat(chat, bob, 1500).unwrap();

        assert!(matches!(
            scoped_changes(&db, bob, chat, 0, 2000),
            Err(ChangeError::Forbidden)
        ));

        let global = global_changes(&db, bob, 1000, 2000).unwrap();
        assert_eq!(global.deleted_chats, vec![chat]);
        assert!(!global.valid_chats.contains(&chat));

        // Advanced cursor no longer reports it
        let global = global_changes(&db, bob, global.timestamp, 3000).unwrap();
        assert!(global.deleted_chats.is_empty());
    }

    #[test]
    fn peer_presence_visible_to_global_poll() {
        let (db, alice, bob, chat) = setup();
        let _ = chat;

        // Alice's heartbeat advances her last_seen
        db.touch_presence(alice, 1500).unwrap();

        let global = global_changes(&db, bob, 1000, 2000).unwrap();
        assert_eq!(global.status_updates.len(), 1);
        assert_eq!(global.status_updates[0].user_id, alice);
        assert!(global.status_updates[0].is_online);
        assert_eq!(global.status_updates[0].last_seen, 1500);

        // The requester never appears in their own status updates
        assert!(global.status_updates.iter().all(|s| s.user_id != bob));
    }

    #[test]
    fn unrelated_users_do_not_leak_presence() {
        let (db, _, bob, _) = setup();
        let stranger = db.create_user("stranger", "hash").unwrap();
        db.touch_presence(stranger, 1500).unwrap();

        let global = global_changes(&db, bob, 0, 2000).unwrap();
        assert!(global.status_updates.iter().all(|s| s.user_id != stranger));
    }

    #[test]
    fn global_timestamp_covers_observed_chat_activity() {
        let (db, alice, bob, chat) = setup();
        // A send whose timestamp lands past this poll's `now` still bumps
        // the chat's updated_at.
        db.send_message(chat, alice, "text", "hi", None, 3000).unwrap();

        let global = global_changes(&db, bob, 0, 2000).unwrap();
        assert_eq!(global.chat_updates, vec![chat]);
        assert!(global.timestamp >= 3000);

        // Polling again with the returned cursor must not redeliver it.
        let global = global_changes(&db, bob, global.timestamp, 3500).unwrap();
        assert!(global.chat_updates.is_empty());
    }

    #[test]
    fn chat_updates_flag_stale_previews() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "hi", None, 1500).unwrap();

        let global = global_changes(&db, bob, 1000, 2000).unwrap();
        assert_eq!(global.chat_updates, vec![chat]);

        let global = global_changes(&db, bob, 1500, 2000).unwrap();
        assert!(global.chat_updates.is_empty());
    }
}

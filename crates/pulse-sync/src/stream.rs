use pulse_db::Database;
use pulse_types::events::{ChatSummary, UpdateRecord};
use pulse_types::models::ChatKind;
use tracing::warn;

use crate::ChangeError;
use crate::changes::message_view;

/// Full chat list with unread counts, sent as the stream's `init` event so
/// the tick loop only ever has to push deltas afterwards.
pub fn init_snapshot(db: &Database, user_id: i64) -> Result<Vec<ChatSummary>, ChangeError> {
    let rows = db.chat_summaries(user_id)?;
    Ok(rows
        .into_iter()
        .map(|(chat, unread)| ChatSummary {
            chat_id: chat.id,
            kind: parse_chat_kind(&chat.kind, chat.id),
            title: chat.title,
            updated_at: chat.updated_at,
            unread_count: unread,
        })
        .collect())
}

/// One tick of the push loop: everything that changed for `user_id` since
/// the previous tick's timestamp.
///
/// New messages exclude the user's own (the sender already has them from
/// the send response) and are ordered by (sent_at, id) across chats, then
/// peer presence transitions follow. Unlike the scoped poll, a tick never
/// marks anything read — the stream path is side-effect free on the
/// receipt ledger.
pub fn stream_tick(
    db: &Database,
    user_id: i64,
    since: i64,
) -> Result<Vec<UpdateRecord>, ChangeError> {
    let mut messages = Vec::new();
    for (chat_id, _) in db.chats_updated_since(user_id, since)? {
        for row in db.messages_since(chat_id, since)? {
            if row.sender_id == user_id {
                continue;
            }
            messages.push(row);
        }
    }
    messages.sort_by_key(|m| (m.sent_at, m.id));

    let mut records: Vec<UpdateRecord> = messages
        .into_iter()
        .map(|row| UpdateRecord::NewMessage {
            message: message_view(row, user_id),
        })
        .collect();

    for peer in db.peers_seen_since(user_id, since)? {
        records.push(UpdateRecord::OnlineStatus {
            user_id: peer.user_id,
            is_online: peer.is_online,
            last_seen: peer.last_seen,
        });
    }

    Ok(records)
}

fn parse_chat_kind(kind: &str, chat_id: i64) -> ChatKind {
    match kind {
        "private" => ChatKind::Private,
        "group" => ChatKind::Group,
        "channel" => ChatKind::Channel,
        other => {
            warn!("Corrupt chat kind '{}' on chat {}", other, chat_id);
            ChatKind::Group
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
        let chat = db.create_chat("group", "room", 100).unwrap();
        db.add_member(chat, alice, "owner").unwrap();
        db.add_member(chat, bob, "member").unwrap();
        (db, alice, bob, chat)
    }

    #[test]
    fn quiet_store_yields_no_records() {
        let (db, _, bob, _) = setup();
        // Nothing changed since t=100 — the loop emits no updates event,
        // only keep-alive frames.
        let records = stream_tick(&db, bob, 100).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn tick_excludes_own_messages() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "from alice", None, 200).unwrap();
        db.send_message(chat, bob, "text", "from bob", None, 300).unwrap();

        let records = stream_tick(&db, bob, 100).unwrap();
        assert_eq!(records.len(), 1);
        match &records[0] {
            UpdateRecord::NewMessage { message } => {
                assert_eq!(message.sender_id, alice);
                assert!(!message.is_own);
            }
            other => panic!("expected NewMessage, got {:?}", other),
        }
    }

    #[test]
    fn tick_orders_messages_before_status_and_by_time() {
        let (db, alice, bob, chat) = setup();
        let carol = db.create_user("carol", "hash").unwrap();
        db.add_member(chat, carol, "member").unwrap();

        db.send_message(chat, alice, "text", "second", None, 300).unwrap();
        db.send_message(chat, carol, "text", "first", None, 200).unwrap();
        db.touch_presence(alice, 400).unwrap();

        let records = stream_tick(&db, bob, 100).unwrap();
        assert_eq!(records.len(), 3);
        assert!(matches!(
            &records[0],
            UpdateRecord::NewMessage { message } if message.sent_at == 200
        ));
        assert!(matches!(
            &records[1],
            UpdateRecord::NewMessage { message } if message.sent_at == 300
        ));
        assert!(matches!(&records[2], UpdateRecord::OnlineStatus { .. }));
    }

    #[test]
    fn tick_does_not_mark_read() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "hi", None, 200).unwrap();

        let _ = stream_tick(&db, bob, 100).unwrap();

        // Receipt ledger untouched by the stream path
        let unread = db.unread_counts(bob).unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].unread, 1);
    }

    #[test]
    fn init_snapshot_carries_unread_counts() {
        let (db, alice, bob, chat) = setup();
        db.send_message(chat, alice, "text", "one", None, 200).unwrap();
        db.send_message(chat, alice, "text", "two", None, 300).unwrap();

        let chats = init_snapshot(&db, bob).unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].chat_id, chat);
        assert_eq!(chats[0].unread_count, 2);
        assert_eq!(chats[0].updated_at, 300);
    }

    #[test]
    fn tick_stops_after_membership_removal() {
        let (db, alice, bob, chat) = setup();
        db.soft_delete_chat(chat, bob, 150).unwrap();
        db.send_message(chat, alice, "text", "hi", None, 200).unwrap();

        let records = stream_tick(&db, bob, 100).unwrap();
        assert!(records.iter().all(|r| !matches!(r, UpdateRecord::NewMessage { .. })));
    }
}

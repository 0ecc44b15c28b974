use crate::Database;
use crate::models::{ChatRow, MessageRow, PeerStatusRow, ReadReceiptRow, UnreadCountRow, UserRow};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (username, password) VALUES (?1, ?2)",
                (username, password_hash),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Heartbeat: flips the user online and advances last_seen. MAX keeps
    /// last_seen monotonic under racing polls.
    pub fn touch_presence(&self, user_id: i64, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_online = 1, last_seen = MAX(last_seen, ?2) WHERE id = ?1",
                (user_id, now),
            )?;
            Ok(())
        })
    }

    pub fn set_offline(&self, user_id: i64, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE users SET is_online = 0, last_seen = MAX(last_seen, ?2) WHERE id = ?1",
                (user_id, now),
            )?;
            Ok(())
        })
    }

    /// Peers (users sharing at least one live chat with `user_id`) whose
    /// last_seen moved past the cursor. Excludes the requester.
    pub fn peers_seen_since(&self, user_id: i64, cursor: i64) -> Result<Vec<PeerStatusRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT u.id, u.is_online, u.last_seen
                 FROM users u
                 JOIN memberships pm ON pm.user_id = u.id AND pm.deleted_at IS NULL
                 JOIN memberships my ON my.chat_id = pm.chat_id
                     AND my.user_id = ?1 AND my.deleted_at IS NULL
                 WHERE u.id != ?1 AND u.last_seen > ?2
                 ORDER BY u.id",
            )?;
            let rows = stmt
                .query_map((user_id, cursor), |row| {
                    Ok(PeerStatusRow {
                        user_id: row.get(0)?,
                        is_online: row.get(1)?,
                        last_seen: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Chats and memberships --

    pub fn create_chat(&self, kind: &str, title: &str, now: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chats (kind, title, updated_at) VALUES (?1, ?2, ?3)",
                (kind, title, now),
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn add_member(&self, chat_id: i64, user_id: i64, role: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO memberships (chat_id, user_id, role) VALUES (?1, ?2, ?3)",
                (chat_id, user_id, role),
            )?;
            Ok(())
        })
    }

    pub fn chat_exists(&self, chat_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chats WHERE id = ?1",
                [chat_id],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Live membership check: the row must exist and not be soft-deleted.
    pub fn is_member(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM memberships
                 WHERE chat_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                (chat_id, user_id),
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Current full list of chat ids the user belongs to. The client
    /// detects lost access by set difference against this list.
    pub fn chat_ids_for_user(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.chat_id FROM memberships m
                 JOIN chats c ON c.id = m.chat_id
                 WHERE m.user_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY m.chat_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(rows)
        })
    }

    /// Chats whose updated_at moved past the cursor, as (chat_id, updated_at).
    /// The timestamp comes along because racing sends can bump updated_at
    /// past the caller's captured `now`, and the snapshot cursor must cover
    /// everything it reports.
    pub fn chats_updated_since(&self, user_id: i64, cursor: i64) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.updated_at FROM chats c
                 JOIN memberships m ON m.chat_id = c.id
                 WHERE m.user_id = ?1 AND m.deleted_at IS NULL AND c.updated_at > ?2
                 ORDER BY c.id",
            )?;
            let rows = stmt
                .query_map((user_id, cursor), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(i64, i64)>, _>>()?;
            Ok(rows)
        })
    }

    /// Per-user soft deletes past the cursor, as (chat_id, deleted_at).
    pub fn soft_deleted_chats_since(&self, user_id: i64, cursor: i64) -> Result<Vec<(i64, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, deleted_at FROM memberships
                 WHERE user_id = ?1 AND deleted_at IS NOT NULL AND deleted_at > ?2
                 ORDER BY chat_id",
            )?;
            let rows = stmt
                .query_map((user_id, cursor), |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<(i64, i64)>, _>>()?;
            Ok(rows)
        })
    }

    /// Hide a chat for one user only. Delivery to that user stops; other
    /// members are unaffected.
    pub fn soft_delete_chat(&self, chat_id: i64, user_id: i64, now: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "UPDATE memberships SET deleted_at = ?3
                 WHERE chat_id = ?1 AND user_id = ?2 AND deleted_at IS NULL",
                (chat_id, user_id, now),
            )?;
            Ok(())
        })
    }

    /// Remove a chat for everyone. Memberships, messages and statuses go
    /// with it via FK cascade; open scoped polls observe ChatGone.
    pub fn hard_delete_chat(&self, chat_id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute("DELETE FROM chats WHERE id = ?1", [chat_id])?;
            Ok(())
        })
    }

    /// Chat list with per-chat unread counts, used to seed a fresh stream.
    pub fn chat_summaries(&self, user_id: i64) -> Result<Vec<(ChatRow, i64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.id, c.kind, c.title, c.updated_at, c.created_at,
                        (SELECT COUNT(*) FROM message_status s
                         JOIN messages msg ON msg.id = s.message_id
                         WHERE s.user_id = ?1 AND s.is_read = 0 AND msg.chat_id = c.id)
                 FROM chats c
                 JOIN memberships m ON m.chat_id = c.id
                 WHERE m.user_id = ?1 AND m.deleted_at IS NULL
                 ORDER BY c.updated_at DESC, c.id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok((
                        ChatRow {
                            id: row.get(0)?,
                            kind: row.get(1)?,
                            title: row.get(2)?,
                            updated_at: row.get(3)?,
                            created_at: row.get(4)?,
                        },
                        row.get(5)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn unread_counts(&self, user_id: i64) -> Result<Vec<UnreadCountRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT msg.chat_id, COUNT(*) FROM message_status s
                 JOIN messages msg ON msg.id = s.message_id
                 JOIN memberships m ON m.chat_id = msg.chat_id
                     AND m.user_id = s.user_id AND m.deleted_at IS NULL
                 WHERE s.user_id = ?1 AND s.is_read = 0
                 GROUP BY msg.chat_id",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(UnreadCountRow {
                        chat_id: row.get(0)?,
                        unread: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Insert a message, bump the chat's updated_at, and create a status
    /// row for every live member except the sender — one transaction, so a
    /// concurrent poller never sees a message without its receipt ledger.
    pub fn send_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        kind: &str,
        body: &str,
        file_ref: Option<&str>,
        now: i64,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO messages (chat_id, sender_id, kind, body, file_ref, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                (chat_id, sender_id, kind, body, file_ref, now),
            )?;
            let message_id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                (chat_id, now),
            )?;

            tx.execute(
                "INSERT INTO message_status (message_id, user_id)
                 SELECT ?1, user_id FROM memberships
                 WHERE chat_id = ?2 AND user_id != ?3 AND deleted_at IS NULL",
                (message_id, chat_id, sender_id),
            )?;

            tx.commit()?;
            Ok(message_id)
        })
    }

    /// Messages in a chat with sent_at strictly after the cursor, oldest
    /// first. Ties on sent_at break by id so repeated calls never reorder.
    pub fn messages_since(&self, chat_id: i64, cursor: i64) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, kind, body, file_ref, sent_at, edited, deleted
                 FROM messages
                 WHERE chat_id = ?1 AND sent_at > ?2
                 ORDER BY sent_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map((chat_id, cursor), |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        kind: row.get(3)?,
                        body: row.get(4)?,
                        file_ref: row.get(5)?,
                        sent_at: row.get(6)?,
                        edited: row.get(7)?,
                        deleted: row.get(8)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flip delivered+read for a specific set of messages. Already-read
    /// rows keep their original read_at.
    pub fn mark_messages_read(&self, user_id: i64, message_ids: &[i64], now: i64) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }

        self.with_conn_mut(|conn| {
            let placeholders: Vec<String> =
                (3..=message_ids.len() + 2).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "UPDATE message_status
                 SET delivered = 1, delivered_at = COALESCE(delivered_at, ?2),
                     is_read = 1, read_at = ?2
                 WHERE user_id = ?1 AND is_read = 0 AND message_id IN ({})",
                placeholders.join(", ")
            );

            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id, &now];
            params.extend(message_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql));
            conn.execute(&sql, params.as_slice())?;

            let max_id = message_ids.iter().max().copied().unwrap_or(0);
            conn.execute(
                "UPDATE memberships
                 SET last_read_message_id = MAX(COALESCE(last_read_message_id, 0), ?2)
                 WHERE user_id = ?1
                     AND chat_id = (SELECT chat_id FROM messages WHERE id = ?2)",
                (user_id, max_id),
            )?;
            Ok(())
        })
    }

    /// Explicit mark-as-read: everything in the chat up to a message id.
    pub fn mark_read_up_to(
        &self,
        chat_id: i64,
        user_id: i64,
        up_to_message_id: i64,
        now: i64,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE message_status
                 SET delivered = 1, delivered_at = COALESCE(delivered_at, ?3),
                     is_read = 1, read_at = ?3
                 WHERE user_id = ?1 AND is_read = 0 AND message_id IN
                     (SELECT id FROM messages WHERE chat_id = ?2 AND id <= ?4)",
                (user_id, chat_id, now, up_to_message_id),
            )?;
            tx.execute(
                "UPDATE memberships
                 SET last_read_message_id = MAX(COALESCE(last_read_message_id, 0), ?3)
                 WHERE chat_id = ?1 AND user_id = ?2",
                (chat_id, user_id, up_to_message_id),
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Read-receipt flips for `sender_id`'s own messages in a chat: ids
    /// whose earliest read moved past the cursor. Grouped so a group chat
    /// with many readers still yields one flip per message.
    pub fn read_receipts_since(
        &self,
        chat_id: i64,
        sender_id: i64,
        cursor: i64,
    ) -> Result<Vec<ReadReceiptRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.message_id, MAX(s.read_at) FROM message_status s
                 JOIN messages msg ON msg.id = s.message_id
                 WHERE msg.chat_id = ?1 AND msg.sender_id = ?2
                     AND s.is_read = 1 AND s.read_at > ?3
                 GROUP BY s.message_id
                 ORDER BY s.message_id",
            )?;
            let rows = stmt
                .query_map((chat_id, sender_id, cursor), |row| {
                    Ok(ReadReceiptRow {
                        message_id: row.get(0)?,
                        read_at: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn query_user<P: rusqlite::ToSql>(
    conn: &Connection,
    predicate: &str,
    param: P,
) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, is_online, last_seen, created_at
         FROM users WHERE {}",
        predicate
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([param], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_online: row.get(3)?,
                last_seen: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

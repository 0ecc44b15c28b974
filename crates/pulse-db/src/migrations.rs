use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            is_online   INTEGER NOT NULL DEFAULT 0,
            last_seen   INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          INTEGER PRIMARY KEY,
            kind        TEXT NOT NULL CHECK (kind IN ('private', 'group', 'channel')),
            title       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT 0,
            created_at  INTEGER NOT NULL DEFAULT (unixepoch())
        );

        CREATE TABLE IF NOT EXISTS memberships (
            chat_id                 INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            user_id                 INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role                    TEXT NOT NULL DEFAULT 'member'
                                        CHECK (role IN ('owner', 'admin', 'member')),
            last_read_message_id    INTEGER,
            deleted_at              INTEGER,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_memberships_user
            ON memberships(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            kind        TEXT NOT NULL DEFAULT 'text'
                            CHECK (kind IN ('text', 'file', 'system')),
            body        TEXT NOT NULL,
            file_ref    TEXT,
            sent_at     INTEGER NOT NULL,
            edited      INTEGER NOT NULL DEFAULT 0,
            deleted     INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, sent_at);

        CREATE TABLE IF NOT EXISTS message_status (
            message_id      INTEGER NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
            user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            delivered       INTEGER NOT NULL DEFAULT 0,
            delivered_at    INTEGER,
            is_read         INTEGER NOT NULL DEFAULT 0,
            read_at         INTEGER,
            PRIMARY KEY (message_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_status_user_unread
            ON message_status(user_id, is_read);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

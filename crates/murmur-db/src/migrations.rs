use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Chat service --

        CREATE TABLE IF NOT EXISTS chats (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_id  TEXT NOT NULL,
            name        TEXT NOT NULL,
            description TEXT,
            chat_type   TEXT NOT NULL,
            encrypted   INTEGER NOT NULL DEFAULT 0,
            avatar_url  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS chat_participants (
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL,
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON chat_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id   TEXT NOT NULL,
            content     TEXT,
            status      TEXT NOT NULL,
            message_type TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        -- A message belongs to exactly one chat
        CREATE TABLE IF NOT EXISTS chat_messages (
            message_id  INTEGER PRIMARY KEY REFERENCES messages(id),
            chat_id     INTEGER NOT NULL REFERENCES chats(id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_chat
            ON chat_messages(chat_id, message_id);

        CREATE TABLE IF NOT EXISTS files (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            url         TEXT NOT NULL,
            file_type   TEXT NOT NULL,
            size        INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_files (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            file_id     INTEGER NOT NULL REFERENCES files(id),
            PRIMARY KEY (message_id, file_id)
        );

        CREATE TABLE IF NOT EXISTS media (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            url         TEXT NOT NULL,
            media_type  TEXT NOT NULL,
            size        INTEGER NOT NULL DEFAULT 0,
            uploaded_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_media (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            media_id    INTEGER NOT NULL REFERENCES media(id),
            PRIMARY KEY (message_id, media_id)
        );

        CREATE TABLE IF NOT EXISTS locations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            latitude    REAL NOT NULL,
            longitude   REAL NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS message_locations (
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            location_id INTEGER NOT NULL REFERENCES locations(id),
            PRIMARY KEY (message_id, location_id)
        );

        CREATE TABLE IF NOT EXISTS chat_actions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL,
            action_type TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_chat_actions_chat
            ON chat_actions(chat_id, created_at);

        CREATE TABLE IF NOT EXISTS message_actions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id  INTEGER NOT NULL REFERENCES messages(id),
            user_id     TEXT NOT NULL,
            action_type TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_message_actions_message
            ON message_actions(message_id, created_at);

        CREATE TABLE IF NOT EXISTS chat_roles (
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL,
            granter_id  TEXT NOT NULL,
            nickname    TEXT NOT NULL DEFAULT '',
            role        TEXT NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS pinned_chats (
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL,
            priority    INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS pinned_messages (
            message_id  INTEGER PRIMARY KEY REFERENCES messages(id),
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            pinned_by   TEXT NOT NULL,
            priority    INTEGER
        );

        CREATE TABLE IF NOT EXISTS blocked_chats (
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     TEXT NOT NULL,
            blocked_at  TEXT NOT NULL,
            PRIMARY KEY (chat_id, user_id)
        );

        -- Presence keys with expiry, in unix milliseconds
        CREATE TABLE IF NOT EXISTS presence_keys (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            expires_at  INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_presence_expiry
            ON presence_keys(expires_at);

        -- Notification service --

        CREATE TABLE IF NOT EXISTS notify_users (
            user_id     TEXT PRIMARY KEY,
            username    TEXT NOT NULL DEFAULT '',
            name        TEXT NOT NULL DEFAULT '',
            avatar_url  TEXT
        );

        CREATE TABLE IF NOT EXISTS notify_chats (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_external_id    INTEGER NOT NULL UNIQUE,
            creator_id          TEXT NOT NULL,
            name                TEXT NOT NULL,
            encrypted           INTEGER NOT NULL DEFAULT 0,
            avatar_url          TEXT,
            action              TEXT,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notify_messages (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            message_external_id INTEGER NOT NULL UNIQUE,
            sender_id           TEXT NOT NULL,
            message_type        TEXT NOT NULL,
            action              TEXT,
            updated_at          TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notify_chat_messages (
            message_id  INTEGER PRIMARY KEY REFERENCES notify_messages(id),
            chat_id     INTEGER NOT NULL REFERENCES notify_chats(id)
        );

        CREATE TABLE IF NOT EXISTS chat_notifications (
            chat_id         INTEGER NOT NULL REFERENCES notify_chats(id),
            recipient_id    TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (chat_id, recipient_id)
        );

        CREATE TABLE IF NOT EXISTS message_notifications (
            message_id      INTEGER NOT NULL REFERENCES notify_messages(id),
            recipient_id    TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (message_id, recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_message_notifications_unread
            ON message_notifications(recipient_id, is_read);

        CREATE TABLE IF NOT EXISTS user_notifications (
            user_id     TEXT NOT NULL,
            chat_id     INTEGER NOT NULL,
            mute        INTEGER NOT NULL DEFAULT 0,
            term        TEXT,
            PRIMARY KEY (user_id, chat_id)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}

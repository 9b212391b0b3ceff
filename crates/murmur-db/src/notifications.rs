use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Row, params};

use murmur_types::Result;
use murmur_types::events::{NotificationChat, NotificationMessage};
use murmur_types::models::{
    ChatBriefInfo, MessageBriefInfo, MessageType, MuteSetting, UserBriefInfo,
};

use crate::repo::NotificationRepository;
use crate::{Database, bad_column};

// A mute counts only while its term is open or still in the future.
const NOT_MUTED: &str =
    "NOT (COALESCE(un.mute, 0) = 1 AND (un.term IS NULL OR un.term > ?2))";

/// Reads `chat_external_id, creator_id, name, encrypted, avatar_url, updated_at` starting at `at`.
fn chat_brief(row: &Row<'_>, at: usize) -> rusqlite::Result<ChatBriefInfo> {
    Ok(ChatBriefInfo {
        chat_id: row.get(at)?,
        creator_id: row.get(at + 1)?,
        name: row.get(at + 2)?,
        encrypted: row.get(at + 3)?,
        avatar_url: row.get(at + 4)?,
        updated_at: row.get(at + 5)?,
    })
}

/// Reads `user_id, username, name, avatar_url` starting at `at`.
fn user_brief(row: &Row<'_>, at: usize) -> rusqlite::Result<UserBriefInfo> {
    Ok(UserBriefInfo {
        user_id: row.get(at)?,
        username: row.get(at + 1)?,
        name: row.get(at + 2)?,
        avatar_url: row.get(at + 3)?,
    })
}

#[async_trait]
impl NotificationRepository for Database {
    async fn upsert_user(&self, user: &UserBriefInfo) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO notify_users (user_id, username, name, avatar_url)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    username = excluded.username,
                    name = excluded.name,
                    avatar_url = excluded.avatar_url",
                params![user.user_id, user.username, user.name, user.avatar_url],
            )?;
            Ok(())
        })
    }

    async fn upsert_chat(&self, chat: &ChatBriefInfo, action: Option<&str>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO notify_chats (chat_external_id, creator_id, name, encrypted, avatar_url, action, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(chat_external_id) DO UPDATE SET
                    name = excluded.name,
                    encrypted = excluded.encrypted,
                    avatar_url = excluded.avatar_url,
                    action = COALESCE(excluded.action, notify_chats.action),
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    chat.chat_id,
                    chat.creator_id,
                    chat.name,
                    chat.encrypted,
                    chat.avatar_url,
                    action,
                    chat.updated_at,
                ],
                |row| row.get(0),
            )
        })
    }

    async fn upsert_message(
        &self,
        message: &MessageBriefInfo,
        action: Option<&str>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                "INSERT INTO notify_messages (message_external_id, sender_id, message_type, action, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(message_external_id) DO UPDATE SET
                    message_type = excluded.message_type,
                    action = COALESCE(excluded.action, notify_messages.action),
                    updated_at = excluded.updated_at
                 RETURNING id",
                params![
                    message.message_id,
                    message.sender_id,
                    message.message_type.as_str(),
                    action,
                    message.updated_at,
                ],
                |row| row.get(0),
            )
        })
    }

    async fn attach_message(&self, chat_row: i64, message_row: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO notify_chat_messages (message_id, chat_id) VALUES (?1, ?2)",
                params![message_row, chat_row],
            )?;
            Ok(())
        })
    }

    async fn notify_chat(&self, chat_row: i64, recipient_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_notifications (chat_id, recipient_id) VALUES (?1, ?2)",
                params![chat_row, recipient_id],
            )?;
            Ok(())
        })
    }

    async fn notify_message(&self, message_row: i64, recipient_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_notifications (message_id, recipient_id) VALUES (?1, ?2)",
                params![message_row, recipient_id],
            )?;
            Ok(())
        })
    }

    async fn take_unread(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Vec<NotificationMessage>, Vec<NotificationChat>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let mut messages = Vec::new();
            let mut message_rows = Vec::new();
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT mn.message_id,
                            m.message_external_id, m.sender_id, m.message_type, m.updated_at, m.action,
                            c.chat_external_id, c.creator_id, c.name, c.encrypted, c.avatar_url, c.updated_at,
                            m.sender_id, COALESCE(u.username, ''), COALESCE(u.name, ''), u.avatar_url
                     FROM message_notifications mn
                     JOIN notify_messages m ON m.id = mn.message_id
                     JOIN notify_chat_messages cm ON cm.message_id = m.id
                     JOIN notify_chats c ON c.id = cm.chat_id
                     LEFT JOIN notify_users u ON u.user_id = m.sender_id
                     LEFT JOIN user_notifications un
                        ON un.user_id = mn.recipient_id AND un.chat_id = c.chat_external_id
                     WHERE mn.recipient_id = ?1 AND mn.is_read = 0 AND {NOT_MUTED}
                     ORDER BY m.updated_at, m.id"
                ))?;
                let mut rows = stmt.query(params![recipient_id, now])?;
                while let Some(row) = rows.next()? {
                    let kind: String = row.get(3)?;
                    message_rows.push(row.get::<_, i64>(0)?);
                    messages.push(NotificationMessage {
                        message: MessageBriefInfo {
                            message_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            message_type: MessageType::parse(&kind)
                                .ok_or_else(|| bad_column(3, &kind))?,
                            updated_at: row.get(4)?,
                        },
                        message_action: row.get(5)?,
                        chat: chat_brief(row, 6)?,
                        sender: user_brief(row, 12)?,
                        recipient_id: recipient_id.to_string(),
                    });
                }
            }

            let mut chats = Vec::new();
            let mut chat_rows = Vec::new();
            {
                let mut stmt = tx.prepare(&format!(
                    "SELECT cn.chat_id,
                            c.chat_external_id, c.creator_id, c.name, c.encrypted, c.avatar_url, c.updated_at,
                            c.action,
                            c.creator_id, COALESCE(u.username, ''), COALESCE(u.name, ''), u.avatar_url
                     FROM chat_notifications cn
                     JOIN notify_chats c ON c.id = cn.chat_id
                     LEFT JOIN notify_users u ON u.user_id = c.creator_id
                     LEFT JOIN user_notifications un
                        ON un.user_id = cn.recipient_id AND un.chat_id = c.chat_external_id
                     WHERE cn.recipient_id = ?1 AND cn.is_read = 0 AND {NOT_MUTED}
                     ORDER BY c.updated_at, c.id"
                ))?;
                let mut rows = stmt.query(params![recipient_id, now])?;
                while let Some(row) = rows.next()? {
                    chat_rows.push(row.get::<_, i64>(0)?);
                    chats.push(NotificationChat {
                        chat: chat_brief(row, 1)?,
                        chat_action: row.get(7)?,
                        sender: user_brief(row, 8)?,
                        recipient_id: recipient_id.to_string(),
                    });
                }
            }

            for id in &message_rows {
                tx.execute(
                    "UPDATE message_notifications SET is_read = 1 WHERE message_id = ?1 AND recipient_id = ?2",
                    params![id, recipient_id],
                )?;
            }
            for id in &chat_rows {
                tx.execute(
                    "UPDATE chat_notifications SET is_read = 1 WHERE chat_id = ?1 AND recipient_id = ?2",
                    params![id, recipient_id],
                )?;
            }
            tx.commit()?;

            Ok((messages, chats))
        })
    }

    async fn muted_chats(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<ChatBriefInfo>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.chat_external_id, c.creator_id, c.name, c.encrypted, c.avatar_url, c.updated_at
                 FROM user_notifications un
                 JOIN notify_chats c ON c.chat_external_id = un.chat_id
                 WHERE un.user_id = ?1 AND un.mute = 1 AND (un.term IS NULL OR un.term > ?2)
                 ORDER BY c.updated_at DESC",
            )?;
            let rows = stmt.query_map(params![user_id, now], |row| chat_brief(row, 0))?;
            rows.collect()
        })
    }

    async fn set_mute(&self, setting: &MuteSetting) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_notifications (user_id, chat_id, mute, term)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, chat_id) DO UPDATE SET
                    mute = excluded.mute,
                    term = excluded.term",
                params![setting.user_id, setting.chat_id, setting.mute, setting.term],
            )?;
            Ok(())
        })
    }
}

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Row, params};

use murmur_types::Result;
use murmur_types::models::{MessageAction, MessageRecord, MessageStatus, MessageType};

use crate::repo::MessageRepository;
use crate::{Database, bad_column};

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let status: String = row.get(3)?;
    let kind: String = row.get(4)?;
    Ok(MessageRecord {
        message_id: row.get(0)?,
        sender_id: row.get(1)?,
        content: row.get(2)?,
        status: MessageStatus::parse(&status).ok_or_else(|| bad_column(3, &status))?,
        message_type: MessageType::parse(&kind).ok_or_else(|| bad_column(4, &kind))?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

#[async_trait]
impl MessageRepository for Database {
    async fn create_message(&self, message: &MessageRecord) -> Result<MessageRecord> {
        let now = Utc::now();
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (sender_id, content, status, message_type, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    message.sender_id,
                    message.content,
                    message.status.as_str(),
                    message.message_type.as_str(),
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(MessageRecord {
            message_id: id,
            created_at: now,
            updated_at: now,
            ..message.clone()
        })
    }

    async fn get_message(&self, message_id: i64) -> Result<MessageRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, sender_id, content, status, message_type, created_at, updated_at
                 FROM messages WHERE id = ?1",
                params![message_id],
                message_from_row,
            )
        })
    }

    async fn bind_chat(&self, message_id: i64, chat_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_messages (message_id, chat_id) VALUES (?1, ?2)",
                params![message_id, chat_id],
            )?;
            conn.execute(
                "UPDATE chats SET updated_at = ?2 WHERE id = ?1",
                params![chat_id, Utc::now()],
            )?;
            Ok(())
        })
    }

    async fn messages_for_chat(&self, chat_id: i64, limit: usize) -> Result<Vec<MessageRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, m.content, m.status, m.message_type, m.created_at, m.updated_at
                 FROM messages m
                 JOIN chat_messages cm ON cm.message_id = m.id
                 WHERE cm.chat_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_id, limit as i64], message_from_row)?;
            rows.collect()
        })
    }

    async fn append_message_action(&self, action: &MessageAction) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message_actions (message_id, user_id, action_type, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![action.message_id, action.user_id, action.action_type, action.timestamp],
            )?;
            Ok(())
        })
    }

    async fn message_actions(&self, message_id: i64) -> Result<Vec<MessageAction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, action_type, created_at FROM message_actions
                 WHERE message_id = ?1
                 ORDER BY created_at DESC, id DESC",
            )?;
            let rows = stmt.query_map(params![message_id], |row| {
                Ok(MessageAction {
                    message_id: row.get(0)?,
                    user_id: row.get(1)?,
                    action_type: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }
}

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use murmur_types::Result;
use murmur_types::models::{ChatAction, ChatRecord, ChatRole, ChatType};

use crate::repo::ChatRepository;
use crate::{Database, bad_column};

const CHAT_COLUMNS: &str =
    "c.id, c.creator_id, c.name, c.description, c.chat_type, c.encrypted, c.avatar_url, c.created_at, c.updated_at";

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRecord> {
    let kind: String = row.get(4)?;
    Ok(ChatRecord {
        chat_id: row.get(0)?,
        creator_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        chat_type: ChatType::parse(&kind).ok_or_else(|| bad_column(4, &kind))?,
        encrypted: row.get(5)?,
        avatar_url: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[async_trait]
impl ChatRepository for Database {
    async fn create_chat(&self, chat: &ChatRecord) -> Result<ChatRecord> {
        let now = Utc::now();
        let id = self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chats (creator_id, name, description, chat_type, encrypted, avatar_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    chat.creator_id,
                    chat.name,
                    chat.description,
                    chat.chat_type.as_str(),
                    chat.encrypted,
                    chat.avatar_url,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })?;

        Ok(ChatRecord {
            chat_id: id,
            created_at: now,
            updated_at: now,
            ..chat.clone()
        })
    }

    async fn get_chat(&self, chat_id: i64) -> Result<ChatRecord> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats c WHERE c.id = ?1"),
                params![chat_id],
                chat_from_row,
            )
        })
    }

    async fn chats_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ChatRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats c
                 JOIN chat_participants p ON p.chat_id = c.id
                 WHERE p.user_id = ?1
                 ORDER BY c.updated_at DESC, c.id DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![user_id, limit as i64], chat_from_row)?;
            rows.collect()
        })
    }

    async fn add_participant(&self, chat_id: i64, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_participants (chat_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
                params![chat_id, user_id, Utc::now()],
            )?;
            Ok(())
        })
    }

    async fn participants(&self, chat_id: i64) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM chat_participants WHERE chat_id = ?1 ORDER BY joined_at, user_id",
            )?;
            let rows = stmt.query_map(params![chat_id], |row| row.get(0))?;
            rows.collect()
        })
    }

    async fn append_chat_action(&self, action: &ChatAction) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_actions (chat_id, user_id, action_type, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![action.chat_id, action.user_id, action.action_type, action.timestamp],
            )?;
            Ok(())
        })
    }

    async fn recent_actions(&self, chat_id: i64, limit: usize) -> Result<Vec<ChatAction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, action_type, created_at FROM chat_actions
                 WHERE chat_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
                Ok(ChatAction {
                    chat_id: row.get(0)?,
                    user_id: row.get(1)?,
                    action_type: row.get(2)?,
                    timestamp: row.get(3)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn roles(&self, chat_id: i64) -> Result<Vec<ChatRole>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, granter_id, nickname, role FROM chat_roles WHERE chat_id = ?1",
            )?;
            let rows = stmt.query_map(params![chat_id], |row| {
                Ok(ChatRole {
                    chat_id: row.get(0)?,
                    user_id: row.get(1)?,
                    granter_id: row.get(2)?,
                    nickname: row.get(3)?,
                    role: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn set_role(&self, role: &ChatRole) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_roles (chat_id, user_id, granter_id, nickname, role)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(chat_id, user_id) DO UPDATE SET
                    granter_id = excluded.granter_id,
                    nickname = excluded.nickname,
                    role = excluded.role",
                params![role.chat_id, role.user_id, role.granter_id, role.nickname, role.role],
            )?;
            Ok(())
        })
    }

    async fn set_blocked(&self, chat_id: i64, user_id: &str, blocked: bool) -> Result<()> {
        self.with_conn(|conn| {
            if blocked {
                conn.execute(
                    "INSERT OR IGNORE INTO blocked_chats (chat_id, user_id, blocked_at) VALUES (?1, ?2, ?3)",
                    params![chat_id, user_id, Utc::now()],
                )?;
            } else {
                conn.execute(
                    "DELETE FROM blocked_chats WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                )?;
            }
            Ok(())
        })
    }

    async fn is_blocked(&self, chat_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM blocked_chats WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }
}

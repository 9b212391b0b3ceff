use async_trait::async_trait;
use rusqlite::{OptionalExtension, params};

use murmur_types::Result;
use murmur_types::models::{PinnedChat, PinnedMessage};

use crate::Database;
use crate::repo::PinnedRepository;

#[async_trait]
impl PinnedRepository for Database {
    async fn pinned_chats(&self, user_id: &str, limit: usize) -> Result<Vec<PinnedChat>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT chat_id, user_id, priority FROM pinned_chats
                 WHERE user_id = ?1
                 ORDER BY priority DESC, chat_id
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], |row| {
                Ok(PinnedChat {
                    chat_id: row.get(0)?,
                    user_id: row.get(1)?,
                    priority: row.get(2)?,
                })
            })?;
            rows.collect()
        })
    }

    async fn is_chat_pinned(&self, chat_id: i64, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let hit: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM pinned_chats WHERE chat_id = ?1 AND user_id = ?2",
                    params![chat_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(hit.is_some())
        })
    }

    async fn pin_chat(&self, pinned: &PinnedChat) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pinned_chats (chat_id, user_id, priority) VALUES (?1, ?2, ?3)",
                params![pinned.chat_id, pinned.user_id, pinned.priority],
            )?;
            Ok(())
        })
    }

    async fn update_pinned_chat(&self, pinned: &PinnedChat) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE pinned_chats SET priority = ?3 WHERE chat_id = ?1 AND user_id = ?2",
                params![pinned.chat_id, pinned.user_id, pinned.priority],
            )?;
            Ok(())
        })
    }

    async fn unpin_chat(&self, chat_id: i64, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM pinned_chats WHERE chat_id = ?1 AND user_id = ?2",
                params![chat_id, user_id],
            )?;
            Ok(())
        })
    }

    async fn pin_message(&self, pinned: &PinnedMessage) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pinned_messages (message_id, chat_id, pinned_by, priority)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(message_id) DO UPDATE SET
                    pinned_by = excluded.pinned_by,
                    priority = excluded.priority",
                params![pinned.message_id, pinned.chat_id, pinned.pinned_by_user_id, pinned.priority],
            )?;
            Ok(())
        })
    }

    async fn pinned_message(&self, message_id: i64) -> Result<PinnedMessage> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT chat_id, message_id, pinned_by, priority FROM pinned_messages WHERE message_id = ?1",
                params![message_id],
                |row| {
                    Ok(PinnedMessage {
                        chat_id: row.get(0)?,
                        message_id: row.get(1)?,
                        pinned_by_user_id: row.get(2)?,
                        priority: row.get(3)?,
                    })
                },
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{ChatRepository, MessageRepository};
    use crate::test_support::{group, text};
    use murmur_types::Error;

    #[tokio::test]
    async fn pin_update_unpin() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&group("alice", "team")).await.unwrap();
        let mut pin = PinnedChat {
            chat_id: chat.chat_id,
            user_id: "alice".into(),
            priority: 1,
        };

        db.pin_chat(&pin).await.unwrap();
        assert!(db.is_chat_pinned(chat.chat_id, "alice").await.unwrap());
        assert!(matches!(db.pin_chat(&pin).await, Err(Error::Conflict(_))));

        pin.priority = 5;
        db.update_pinned_chat(&pin).await.unwrap();
        assert_eq!(db.pinned_chats("alice", 10).await.unwrap()[0].priority, 5);

        db.unpin_chat(chat.chat_id, "alice").await.unwrap();
        assert!(db.pinned_chats("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unpinned_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let chat = db.create_chat(&group("alice", "team")).await.unwrap();
        let m = db.create_message(&text("alice", "hi")).await.unwrap();
        assert!(db.pinned_message(m.message_id).await.unwrap_err().is_not_found());

        db.pin_message(&PinnedMessage {
            chat_id: chat.chat_id,
            message_id: m.message_id,
            pinned_by_user_id: "alice".into(),
            priority: None,
        })
        .await
        .unwrap();
        assert_eq!(db.pinned_message(m.message_id).await.unwrap().pinned_by_user_id, "alice");
    }
}

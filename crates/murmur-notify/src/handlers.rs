use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use murmur_db::NotificationRepository;
use murmur_types::events::{NotificationChat, NotificationMessage};
use murmur_types::{Error, Result};

/// Processes one delivery body. Must be safe to run more than once for the same body.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<()>;
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Validation(e.to_string()))
}

/// Records a `chat.created` fallback for its recipient.
pub struct ChatCreatedHandler {
    repo: Arc<dyn NotificationRepository>,
}

impl ChatCreatedHandler {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DeliveryHandler for ChatCreatedHandler {
    async fn handle(&self, body: &[u8]) -> Result<()> {
        let event: NotificationChat = decode(body)?;

        self.repo.upsert_user(&event.sender).await?;
        let chat_row = self
            .repo
            .upsert_chat(&event.chat, event.chat_action.as_deref())
            .await?;
        self.repo.notify_chat(chat_row, &event.recipient_id).await?;

        debug!(
            "Stored chat {} notification for {}",
            event.chat.chat_id, event.recipient_id
        );
        Ok(())
    }
}

/// Records a `message.send` fallback for its recipient.
pub struct MessageSentHandler {
    repo: Arc<dyn NotificationRepository>,
}

impl MessageSentHandler {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl DeliveryHandler for MessageSentHandler {
    async fn handle(&self, body: &[u8]) -> Result<()> {
        let event: NotificationMessage = decode(body)?;

        self.repo.upsert_user(&event.sender).await?;
        let message_row = self
            .repo
            .upsert_message(&event.message, event.message_action.as_deref())
            .await?;
        self.repo
            .notify_message(message_row, &event.recipient_id)
            .await?;
        let chat_row = self.repo.upsert_chat(&event.chat, None).await?;
        self.repo.attach_message(chat_row, message_row).await?;

        debug!(
            "Stored message {} notification for {}",
            event.message.message_id, event.recipient_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_db::Database;
    use murmur_types::models::{
        ChatBriefInfo, MESSAGE_ACTION_SEND, MessageBriefInfo, MessageType, UserBriefInfo,
    };

    fn chat(chat_id: i64) -> ChatBriefInfo {
        ChatBriefInfo {
            chat_id,
            creator_id: "alice".into(),
            name: "team".into(),
            encrypted: false,
            avatar_url: None,
            updated_at: Utc::now(),
        }
    }

    fn sender() -> UserBriefInfo {
        UserBriefInfo {
            user_id: "alice".into(),
            username: "alice".into(),
            name: "Alice".into(),
            avatar_url: None,
        }
    }

    fn message_event(message_id: i64) -> Vec<u8> {
        serde_json::to_vec(&NotificationMessage {
            chat: chat(7),
            message: MessageBriefInfo {
                message_id,
                sender_id: "alice".into(),
                message_type: MessageType::Text,
                updated_at: Utc::now(),
            },
            sender: sender(),
            recipient_id: "bob".into(),
            message_action: Some(MESSAGE_ACTION_SEND.into()),
        })
        .unwrap()
    }

    fn chat_count(db: &Database) -> i64 {
        db.with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM notify_chats", [], |r| r.get(0)))
            .unwrap()
    }

    #[tokio::test]
    async fn replayed_chat_event_keeps_one_chat_row() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let handler = ChatCreatedHandler::new(db.clone());
        let body = serde_json::to_vec(&NotificationChat {
            chat: chat(7),
            sender: sender(),
            recipient_id: "bob".into(),
            chat_action: Some("chat was created".into()),
        })
        .unwrap();

        handler.handle(&body).await.unwrap();
        handler.handle(&body).await.unwrap();

        assert_eq!(chat_count(&db), 1);
        let (_, chats) = db.take_unread("bob", Utc::now()).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].chat.chat_id, 7);
    }

    #[tokio::test]
    async fn message_event_links_chat_and_notification() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let handler = MessageSentHandler::new(db.clone());

        handler.handle(&message_event(31)).await.unwrap();
        handler.handle(&message_event(31)).await.unwrap();

        assert_eq!(chat_count(&db), 1);
        let (messages, _) = db.take_unread("bob", Utc::now()).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message.message_id, 31);
        assert_eq!(messages[0].chat.chat_id, 7);
        assert_eq!(messages[0].sender.name, "Alice");
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_data() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let err = MessageSentHandler::new(db)
            .handle(b"{not json")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid data"));
    }
}

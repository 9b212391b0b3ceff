use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use murmur_types::Result;
use murmur_types::events::{NotificationChat, NotificationMessage};
use murmur_types::models::{
    ChatAction, ChatBriefInfo, ChatRecord, ChatRole, File, Location, Media, MessageAction,
    MessageBriefInfo, MessageRecord, MuteSetting, PinnedChat, PinnedMessage, UserBriefInfo,
};

use crate::Database;

/// Chat rows and the per-chat state hanging off them.
/// Single-row lookups return NotFound on a miss; list lookups return an empty Vec.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Inserts the chat and returns it with its assigned id.
    async fn create_chat(&self, chat: &ChatRecord) -> Result<ChatRecord>;
    async fn get_chat(&self, chat_id: i64) -> Result<ChatRecord>;
    /// Most recently updated chats the user participates in.
    async fn chats_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ChatRecord>>;
    async fn add_participant(&self, chat_id: i64, user_id: &str) -> Result<()>;
    async fn participants(&self, chat_id: i64) -> Result<Vec<String>>;
    async fn append_chat_action(&self, action: &ChatAction) -> Result<()>;
    async fn recent_actions(&self, chat_id: i64, limit: usize) -> Result<Vec<ChatAction>>;
    async fn roles(&self, chat_id: i64) -> Result<Vec<ChatRole>>;
    async fn set_role(&self, role: &ChatRole) -> Result<()>;
    async fn set_blocked(&self, chat_id: i64, user_id: &str, blocked: bool) -> Result<()>;
    async fn is_blocked(&self, chat_id: i64, user_id: &str) -> Result<bool>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create_message(&self, message: &MessageRecord) -> Result<MessageRecord>;
    async fn get_message(&self, message_id: i64) -> Result<MessageRecord>;
    async fn bind_chat(&self, message_id: i64, chat_id: i64) -> Result<()>;
    /// Newest first.
    async fn messages_for_chat(&self, chat_id: i64, limit: usize) -> Result<Vec<MessageRecord>>;
    async fn append_message_action(&self, action: &MessageAction) -> Result<()>;
    async fn message_actions(&self, message_id: i64) -> Result<Vec<MessageAction>>;
}

/// Attachment rows. Each insert writes the attachment and then its binding to the message.
#[async_trait]
pub trait AttachmentRepository: Send + Sync {
    async fn add_file(&self, message_id: i64, file: &File) -> Result<i64>;
    async fn add_media(&self, message_id: i64, media: &Media) -> Result<i64>;
    async fn add_location(&self, message_id: i64, location: &Location) -> Result<i64>;
    async fn files(&self, message_id: i64) -> Result<Vec<File>>;
    async fn media(&self, message_id: i64) -> Result<Vec<Media>>;
    async fn locations(&self, message_id: i64) -> Result<Vec<Location>>;
}

#[async_trait]
pub trait PinnedRepository: Send + Sync {
    async fn pinned_chats(&self, user_id: &str, limit: usize) -> Result<Vec<PinnedChat>>;
    async fn is_chat_pinned(&self, chat_id: i64, user_id: &str) -> Result<bool>;
    async fn pin_chat(&self, pinned: &PinnedChat) -> Result<()>;
    async fn update_pinned_chat(&self, pinned: &PinnedChat) -> Result<()>;
    async fn unpin_chat(&self, chat_id: i64, user_id: &str) -> Result<()>;
    async fn pin_message(&self, pinned: &PinnedMessage) -> Result<()>;
    /// NotFound when the message is not pinned.
    async fn pinned_message(&self, message_id: i64) -> Result<PinnedMessage>;
}

/// Storage of the notification service. Upserts are keyed by the chat service's ids.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn upsert_user(&self, user: &UserBriefInfo) -> Result<()>;
    /// Returns the local row id.
    async fn upsert_chat(&self, chat: &ChatBriefInfo, action: Option<&str>) -> Result<i64>;
    /// Returns the local row id.
    async fn upsert_message(&self, message: &MessageBriefInfo, action: Option<&str>)
    -> Result<i64>;
    async fn attach_message(&self, chat_row: i64, message_row: i64) -> Result<()>;
    async fn notify_chat(&self, chat_row: i64, recipient_id: &str) -> Result<()>;
    async fn notify_message(&self, message_row: i64, recipient_id: &str) -> Result<()>;
    /// Reads the recipient's unread notifications outside muted chats and marks them read.
    async fn take_unread(
        &self,
        recipient_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Vec<NotificationMessage>, Vec<NotificationChat>)>;
    async fn muted_chats(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<ChatBriefInfo>>;
    async fn set_mute(&self, setting: &MuteSetting) -> Result<()>;
}

/// The chat-side repositories, as handed to services.
#[derive(Clone)]
pub struct Repositories {
    pub chats: Arc<dyn ChatRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub attachments: Arc<dyn AttachmentRepository>,
    pub pinned: Arc<dyn PinnedRepository>,
}

impl Repositories {
    pub fn sqlite(db: Arc<Database>) -> Self {
        Self {
            chats: db.clone(),
            messages: db.clone(),
            attachments: db.clone(),
            pinned: db,
        }
    }
}

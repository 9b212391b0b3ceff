use std::sync::Arc;

use chrono::Utc;

use murmur_db::NotificationRepository;
use murmur_types::Result;
use murmur_types::events::NotificationFeed;
use murmur_types::models::MuteSetting;

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>) -> Self {
        Self { repo }
    }

    /// Unread notifications outside muted chats; everything returned is marked read.
    pub async fn feed(&self, user_id: &str) -> Result<NotificationFeed> {
        let now = Utc::now();
        let (messages, chats) = self.repo.take_unread(user_id, now).await?;
        let muted_chats = self.repo.muted_chats(user_id, now).await?;
        Ok(NotificationFeed {
            messages,
            chats,
            muted_chats,
        })
    }

    pub async fn set_mute(&self, user_id: &str, mut setting: MuteSetting) -> Result<()> {
        setting.user_id = user_id.to_string();
        self.repo.set_mute(&setting).await
    }
}

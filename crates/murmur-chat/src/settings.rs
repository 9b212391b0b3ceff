use tracing::debug;

use murmur_db::Repositories;
use murmur_types::Result;
use murmur_types::models::{BlockChat, ChatRole, PinnedChatUpdate};

/// Per-user chat settings: pinning, roles and blocking.
#[derive(Clone)]
pub struct ChatSettings {
    repos: Repositories,
}

impl ChatSettings {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Pins the chat, re-prioritises it if already pinned, or unpins it when `fix` is false.
    pub async fn update_pinned_chat(&self, update: &PinnedChatUpdate) -> Result<()> {
        let pin = &update.pinned_chat;
        self.repos.chats.get_chat(pin.chat_id).await?;

        if !update.fix {
            debug!("Unpinning chat {} for {}", pin.chat_id, pin.user_id);
            return self.repos.pinned.unpin_chat(pin.chat_id, &pin.user_id).await;
        }

        if self.repos.pinned.is_chat_pinned(pin.chat_id, &pin.user_id).await? {
            self.repos.pinned.update_pinned_chat(pin).await
        } else {
            self.repos.pinned.pin_chat(pin).await
        }
    }

    pub async fn set_role(&self, role: &ChatRole) -> Result<()> {
        self.repos.chats.get_chat(role.chat_id).await?;
        self.repos.chats.set_role(role).await
    }

    pub async fn set_block(&self, block: &BlockChat) -> Result<()> {
        self.repos.chats.get_chat(block.chat_id).await?;
        self.repos
            .chats
            .set_blocked(block.chat_id, &block.user_id, block.blocked)
            .await
    }
}

use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use murmur_db::Repositories;
use murmur_types::Result;
use murmur_types::error::absorb_not_found;
use murmur_types::models::{
    ACTION_LIMIT, CHAT_LIMIT, ChatAction, ChatRecord, ChatRole, ChatView, File, Location,
    MESSAGE_LIMIT, Media, MessageAction, MessagePayload, MessageRecord, MessageView,
    PINNED_CHAT_LIMIT, PinnedChatView, PinnedMessage, USER_LIMIT,
};

use crate::fanout::TaskGroup;

/// Hydrates chats into full views by fetching their sub-resources concurrently.
///
/// A NotFound from any sub-fetch counts as "nothing there". Any other error
/// fails the whole call and cancels every outstanding fetch of the batch.
#[derive(Clone)]
pub struct ChatAggregator {
    repos: Repositories,
}

enum ChatPart {
    Participants(Vec<String>),
    Actions(Vec<ChatAction>),
    Roles(Vec<ChatRole>),
    Messages(Vec<MessageView>),
}

enum MessagePart {
    Media(Vec<Media>),
    Locations(Vec<Location>),
    Files(Vec<File>),
    Pinned(Option<PinnedMessage>),
    Actions(Vec<MessageAction>),
}

impl ChatAggregator {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn hydrate(&self, chat_ids: &[i64]) -> Result<Vec<ChatView>> {
        let mut group = TaskGroup::new();
        let token = group.token();
        for &chat_id in chat_ids {
            let this = self.clone();
            let token = token.clone();
            group.spawn(async move {
                let chat = this.repos.chats.get_chat(chat_id).await?;
                this.hydrate_chat(chat, token).await
            });
        }
        group.join().await
    }

    /// The user's most recently active chats.
    pub async fn hydrate_user_chats(&self, user_id: &str) -> Result<Vec<ChatView>> {
        let chats = absorb_not_found(self.repos.chats.chats_for_user(user_id, CHAT_LIMIT).await)?;
        debug!("Hydrating {} chats for {}", chats.len(), user_id);

        let mut group = TaskGroup::new();
        let token = group.token();
        for chat in chats {
            let this = self.clone();
            let token = token.clone();
            group.spawn(async move { this.hydrate_chat(chat, token).await });
        }
        group.join().await
    }

    pub async fn hydrate_pinned_chats(&self, user_id: &str) -> Result<Vec<PinnedChatView>> {
        let pins = absorb_not_found(
            self.repos
                .pinned
                .pinned_chats(user_id, PINNED_CHAT_LIMIT)
                .await,
        )?;

        let mut group = TaskGroup::new();
        let token = group.token();
        for pinned_chat in pins {
            let this = self.clone();
            let token = token.clone();
            group.spawn(async move {
                let chat = this.repos.chats.get_chat(pinned_chat.chat_id).await?;
                let chat = this.hydrate_chat(chat, token).await?;
                Ok(PinnedChatView { chat, pinned_chat })
            });
        }
        group.join().await
    }

    async fn hydrate_chat(&self, chat: ChatRecord, token: CancellationToken) -> Result<ChatView> {
        let chat_id = chat.chat_id;
        let mut group = TaskGroup::with_token(token.clone());

        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.chats.participants(chat_id).await).map(ChatPart::Participants)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.chats.recent_actions(chat_id, ACTION_LIMIT).await)
                .map(ChatPart::Actions)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.chats.roles(chat_id).await).map(ChatPart::Roles)
        });
        let this = self.clone();
        group.spawn(async move { this.hydrate_messages(chat_id, token).await.map(ChatPart::Messages) });

        let mut view = ChatView {
            chat,
            messages: Vec::new(),
            participant_ids: Vec::new(),
            actions: Vec::new(),
            roles: Vec::new(),
        };
        for part in group.join().await? {
            match part {
                ChatPart::Participants(ids) => view.participant_ids = ids,
                ChatPart::Actions(actions) => view.actions = actions,
                ChatPart::Roles(roles) => view.roles = roles,
                ChatPart::Messages(messages) => view.messages = messages,
            }
        }
        Ok(view)
    }

    async fn hydrate_messages(
        &self,
        chat_id: i64,
        token: CancellationToken,
    ) -> Result<Vec<MessageView>> {
        let messages =
            absorb_not_found(self.repos.messages.messages_for_chat(chat_id, MESSAGE_LIMIT).await)?;

        let mut group = TaskGroup::with_token(token.clone());
        for message in messages {
            let this = self.clone();
            let token = token.clone();
            group.spawn(async move { this.hydrate_message(message, token).await });
        }
        group.join().await
    }

    async fn hydrate_message(
        &self,
        message: MessageRecord,
        token: CancellationToken,
    ) -> Result<MessageView> {
        let id = message.message_id;
        let mut group = TaskGroup::with_token(token);

        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.attachments.media(id).await).map(MessagePart::Media)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.attachments.locations(id).await).map(MessagePart::Locations)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.attachments.files(id).await).map(MessagePart::Files)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.pinned.pinned_message(id).await.map(Some)).map(MessagePart::Pinned)
        });
        let repos = self.repos.clone();
        group.spawn(async move {
            absorb_not_found(repos.messages.message_actions(id).await).map(MessagePart::Actions)
        });

        let mut view = MessageView {
            payload: MessagePayload {
                message,
                media: None,
                locations: None,
                files: None,
            },
            pinned: None,
            actions: Vec::new(),
        };
        for part in group.join().await? {
            match part {
                MessagePart::Media(v) => view.payload.media = non_empty(v),
                MessagePart::Locations(v) => view.payload.locations = non_empty(v),
                MessagePart::Files(v) => view.payload.files = non_empty(v),
                MessagePart::Pinned(p) => view.pinned = p,
                MessagePart::Actions(v) => view.actions = v,
            }
        }
        Ok(view)
    }
}

fn non_empty<T>(v: Vec<T>) -> Option<Vec<T>> {
    (!v.is_empty()).then_some(v)
}

/// Unique participant ids across `chats`, at most [`USER_LIMIT`] taken from each chat.
pub fn profile_ids<'a>(chats: impl IntoIterator<Item = &'a ChatView>) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for chat in chats {
        ids.extend(chat.participant_ids.iter().take(USER_LIMIT).cloned());
    }
    ids.into_iter().collect()
}

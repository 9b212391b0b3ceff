use std::collections::HashSet;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use murmur_db::Repositories;
use murmur_types::api::{
    CreateGroupChatRequest, CreateMessageRequest, CreatePrivateChatRequest,
    CreatePrivateChatResponse,
};
use murmur_types::models::{
    AttachmentKind, CHAT_ACTION_CREATE, ChatAction, ChatRecord, ChatView, MessagePayload,
    MessageView,
};
use murmur_types::{Error, Result};

use crate::fanout::TaskGroup;

const ATTACHMENT_KINDS: [AttachmentKind; 3] =
    [AttachmentKind::Media, AttachmentKind::Location, AttachmentKind::File];

/// A persisted message plus what delivery needs to route it.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub chat: ChatRecord,
    pub participant_ids: Vec<String>,
    pub payload: MessagePayload,
}

/// Creates chats and messages together with their attachments.
///
/// Writes run in two concurrent phases and are not transactional: when a
/// phase fails, rows written by branches that already finished stay behind.
#[derive(Clone)]
pub struct ChatPipeline {
    repos: Repositories,
}

enum Created {
    Message(MessagePayload),
    Chat(ChatRecord),
    Participants(Vec<String>),
}

enum Stored {
    Media(Vec<murmur_types::models::Media>),
    Locations(Vec<murmur_types::models::Location>),
    Files(Vec<murmur_types::models::File>),
}

impl ChatPipeline {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    pub async fn create_private_chat(
        &self,
        req: CreatePrivateChatRequest,
    ) -> Result<CreatePrivateChatResponse> {
        validate_chat(&req.chat)?;
        if req.recipient_id.is_empty() {
            return Err(Error::Validation("recipient_id is required".into()));
        }
        if req.recipient_id == req.chat.creator_id {
            return Err(Error::Validation("private chat needs two distinct users".into()));
        }
        validate_message(&req.initial_message.message)?;

        // Phase 1: message with attachments, and the chat row
        let mut phase1 = TaskGroup::new();
        let token = phase1.token();
        let this = self.clone();
        let payload = req.initial_message.message;
        let t = token.clone();
        phase1.spawn(async move { this.store_message(payload, t).await.map(Created::Message) });
        let repos = self.repos.clone();
        let chat = req.chat;
        phase1.spawn(async move { repos.chats.create_chat(&chat).await.map(Created::Chat) });

        let (payload, chat, _) = unpack(phase1.join().await?)?;
        debug!("Private chat {} created by {}", chat.chat_id, chat.creator_id);

        // Phase 2: bind and register
        let mut phase2 = TaskGroup::with_token(token);
        let repos = self.repos.clone();
        let (message_id, chat_id) = (payload.message.message_id, chat.chat_id);
        phase2.spawn(async move { repos.messages.bind_chat(message_id, chat_id).await });
        for user in [chat.creator_id.clone(), req.recipient_id.clone()] {
            let repos = self.repos.clone();
            phase2.spawn(async move { repos.chats.add_participant(chat_id, &user).await });
        }
        let repos = self.repos.clone();
        let action = creation_action(&chat);
        phase2.spawn(async move { repos.chats.append_chat_action(&action).await });
        phase2.join().await?;

        Ok(CreatePrivateChatResponse {
            chat,
            recipient_id: req.recipient_id,
            message: MessageView {
                payload,
                pinned: None,
                actions: Vec::new(),
            },
        })
    }

    pub async fn create_group_chat(&self, req: CreateGroupChatRequest) -> Result<ChatView> {
        validate_chat(&req.chat)?;

        let chat = self.repos.chats.create_chat(&req.chat).await?;
        let chat_id = chat.chat_id;

        let mut participant_ids = req.participant_ids;
        if !participant_ids.contains(&chat.creator_id) {
            participant_ids.insert(0, chat.creator_id.clone());
        }
        let mut seen = HashSet::new();
        participant_ids.retain(|id| seen.insert(id.clone()));

        let mut action = req.chat_action;
        action.chat_id = chat_id;
        if action.user_id.is_empty() {
            action.user_id = chat.creator_id.clone();
        }
        if action.action_type.is_empty() {
            action.action_type = CHAT_ACTION_CREATE.to_string();
        }

        let mut group = TaskGroup::new();
        for user in participant_ids.clone() {
            let repos = self.repos.clone();
            group.spawn(async move { repos.chats.add_participant(chat_id, &user).await });
        }
        let repos = self.repos.clone();
        let logged = action.clone();
        group.spawn(async move { repos.chats.append_chat_action(&logged).await });
        group.join().await?;

        debug!("Group chat {} created with {} participants", chat_id, participant_ids.len());
        Ok(ChatView {
            chat,
            messages: Vec::new(),
            participant_ids,
            actions: vec![action],
            roles: Vec::new(),
        })
    }

    pub async fn send_message(&self, req: CreateMessageRequest) -> Result<SentMessage> {
        if req.chat_id <= 0 {
            return Err(Error::Validation("chat_id is required".into()));
        }
        validate_message(&req.message)?;
        let chat_id = req.chat_id;

        // Phase 1: message with attachments, the chat row and its participants
        let mut phase1 = TaskGroup::new();
        let token = phase1.token();
        let this = self.clone();
        let t = token.clone();
        let payload = req.message;
        phase1.spawn(async move { this.store_message(payload, t).await.map(Created::Message) });
        let repos = self.repos.clone();
        phase1.spawn(async move { repos.chats.get_chat(chat_id).await.map(Created::Chat) });
        let repos = self.repos.clone();
        phase1.spawn(async move {
            repos.chats.participants(chat_id).await.map(Created::Participants)
        });

        let (payload, chat, participant_ids) = unpack(phase1.join().await?)?;

        // Phase 2
        let mut phase2 = TaskGroup::with_token(token);
        let repos = self.repos.clone();
        let message_id = payload.message.message_id;
        phase2.spawn(async move { repos.messages.bind_chat(message_id, chat_id).await });
        phase2.join().await?;

        Ok(SentMessage {
            chat,
            participant_ids: participant_ids.unwrap_or_default(),
            payload,
        })
    }

    /// Inserts the message row, then its attachments concurrently.
    async fn store_message(
        &self,
        mut payload: MessagePayload,
        token: CancellationToken,
    ) -> Result<MessagePayload> {
        payload.message = self.repos.messages.create_message(&payload.message).await?;
        let message_id = payload.message.message_id;
        let kind = payload.message.message_type;

        let mut group = TaskGroup::with_token(token);
        for attachment in ATTACHMENT_KINDS.into_iter().filter(|a| kind.requires(*a)) {
            let repos = self.repos.clone();
            match attachment {
                AttachmentKind::Media => {
                    let items = payload.media.take().unwrap_or_default();
                    group.spawn(async move {
                        let mut stored = Vec::with_capacity(items.len());
                        for mut item in items {
                            item.media_id = repos
                                .attachments
                                .add_media(message_id, &item)
                                .await
                                .map_err(|e| upload_failed(AttachmentKind::Media, e))?;
                            stored.push(item);
                        }
                        Ok(Stored::Media(stored))
                    });
                }
                AttachmentKind::Location => {
                    let items = payload.locations.take().unwrap_or_default();
                    group.spawn(async move {
                        let mut stored = Vec::with_capacity(items.len());
                        for mut item in items {
                            item.location_id = repos
                                .attachments
                                .add_location(message_id, &item)
                                .await
                                .map_err(|e| upload_failed(AttachmentKind::Location, e))?;
                            stored.push(item);
                        }
                        Ok(Stored::Locations(stored))
                    });
                }
                AttachmentKind::File => {
                    let items = payload.files.take().unwrap_or_default();
                    group.spawn(async move {
                        let mut stored = Vec::with_capacity(items.len());
                        for mut item in items {
                            item.file_id = repos
                                .attachments
                                .add_file(message_id, &item)
                                .await
                                .map_err(|e| upload_failed(AttachmentKind::File, e))?;
                            stored.push(item);
                        }
                        Ok(Stored::Files(stored))
                    });
                }
            }
        }

        for stored in group.join().await? {
            match stored {
                Stored::Media(v) => payload.media = Some(v),
                Stored::Locations(v) => payload.locations = Some(v),
                Stored::Files(v) => payload.files = Some(v),
            }
        }
        Ok(payload)
    }
}

/// A rejected attachment write becomes `UploadFailed`. Cancellation and
/// transient store errors keep their class so they still cancel siblings.
fn upload_failed(kind: AttachmentKind, e: Error) -> Error {
    if matches!(e, Error::Cancelled | Error::UpstreamTransient(_)) {
        return e;
    }
    warn!("Storing {} failed: {}", kind, e);
    Error::UploadFailed(kind)
}

fn unpack(parts: Vec<Created>) -> Result<(MessagePayload, ChatRecord, Option<Vec<String>>)> {
    let mut payload = None;
    let mut chat = None;
    let mut participants = None;
    for part in parts {
        match part {
            Created::Message(p) => payload = Some(p),
            Created::Chat(c) => chat = Some(c),
            Created::Participants(ids) => participants = Some(ids),
        }
    }
    match (payload, chat) {
        (Some(payload), Some(chat)) => Ok((payload, chat, participants)),
        _ => Err(Error::internal("phase one finished without its results")),
    }
}

fn creation_action(chat: &ChatRecord) -> ChatAction {
    ChatAction {
        chat_id: chat.chat_id,
        user_id: chat.creator_id.clone(),
        action_type: CHAT_ACTION_CREATE.to_string(),
        timestamp: Utc::now(),
    }
}

fn validate_chat(chat: &ChatRecord) -> Result<()> {
    if chat.creator_id.is_empty() {
        return Err(Error::Validation("creator_id is required".into()));
    }
    if chat.name.is_empty() {
        return Err(Error::Validation("chat name is required".into()));
    }
    Ok(())
}

/// Checks required fields and that every attachment collection the type
/// demands is present. Runs before anything is written.
pub fn validate_message(payload: &MessagePayload) -> Result<()> {
    if payload.message.sender_id.is_empty() {
        return Err(Error::Validation("sender_id is required".into()));
    }
    let kind = payload.message.message_type;
    for attachment in ATTACHMENT_KINDS {
        if kind.requires(attachment) && !payload.has(attachment) {
            return Err(Error::Empty(attachment));
        }
    }
    Ok(())
}

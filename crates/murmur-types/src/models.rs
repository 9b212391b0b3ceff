use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CHAT_LIMIT: usize = 10;
pub const PINNED_CHAT_LIMIT: usize = 10;
pub const MESSAGE_LIMIT: usize = 75;
pub const ACTION_LIMIT: usize = 30;
/// Participant profiles requested per chat during messenger initialization.
pub const USER_LIMIT: usize = 200;

pub const CHAT_ACTION_CREATE: &str = "chat was created";

pub const MESSAGE_ACTION_SEND: &str = "send";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Group,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Group => "group",
            Self::Channel => "channel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "private" => Some(Self::Private),
            "group" => Some(Self::Group),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
    File,
    Location,
    Mixed,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Media => "media",
            Self::File => "file",
            Self::Location => "location",
            Self::Mixed => "mixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "media" => Some(Self::Media),
            "file" => Some(Self::File),
            "location" => Some(Self::Location),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    /// Whether a message of this type must carry attachments of `kind`.
    /// `Mixed` requires every kind.
    pub fn requires(&self, kind: AttachmentKind) -> bool {
        match self {
            Self::Mixed => true,
            Self::Media => kind == AttachmentKind::Media,
            Self::File => kind == AttachmentKind::File,
            Self::Location => kind == AttachmentKind::Location,
            Self::Text => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(Self::Sent),
            "delivered" => Some(Self::Delivered),
            "read" => Some(Self::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    File,
    Media,
    Location,
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::File => "files",
            Self::Media => "media",
            Self::Location => "location",
        })
    }
}

/// A chat row as stored by the chat service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default)]
    pub chat_id: i64,
    pub creator_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A message row. `content` is ciphertext everywhere except transient push payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub message_id: i64,
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub status: MessageStatus,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    #[serde(default)]
    pub file_id: i64,
    pub url: String,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub media_id: i64,
    pub url: String,
    #[serde(rename = "type")]
    pub media_type: String,
    #[serde(default)]
    pub size: i64,
    #[serde(default = "Utc::now")]
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub location_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatAction {
    #[serde(default)]
    pub chat_id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAction {
    pub message_id: i64,
    pub user_id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRole {
    pub chat_id: i64,
    pub user_id: String,
    pub granter_id: String,
    #[serde(default)]
    pub nickname: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedChat {
    pub chat_id: i64,
    pub user_id: String,
    #[serde(default)]
    pub priority: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub pinned_by_user_id: String,
    #[serde(default)]
    pub priority: Option<i8>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinnedChatUpdate {
    pub pinned_chat: PinnedChat,
    /// `true` pins (or re-prioritises), `false` unpins.
    pub fix: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockChat {
    pub chat_id: i64,
    pub user_id: String,
    pub blocked: bool,
}

/// A message together with the attachments it was sent with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: MessageRecord,
    #[serde(default)]
    pub media: Option<Vec<Media>>,
    #[serde(default)]
    pub locations: Option<Vec<Location>>,
    #[serde(default)]
    pub files: Option<Vec<File>>,
}

impl MessagePayload {
    pub fn text(sender_id: &str, content: &str) -> Self {
        let now = Utc::now();
        Self {
            message: MessageRecord {
                message_id: 0,
                sender_id: sender_id.to_string(),
                content: Some(content.to_string()),
                status: MessageStatus::Sent,
                message_type: MessageType::Text,
                created_at: now,
                updated_at: now,
            },
            media: None,
            locations: None,
            files: None,
        }
    }

    /// Whether the collection for `kind` is present and non-empty.
    pub fn has(&self, kind: AttachmentKind) -> bool {
        match kind {
            AttachmentKind::File => self.files.as_ref().is_some_and(|v| !v.is_empty()),
            AttachmentKind::Media => self.media.as_ref().is_some_and(|v| !v.is_empty()),
            AttachmentKind::Location => self.locations.as_ref().is_some_and(|v| !v.is_empty()),
        }
    }
}

/// A fully hydrated message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub pinned: Option<PinnedMessage>,
    pub actions: Vec<MessageAction>,
}

/// A fully hydrated chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatView {
    pub chat: ChatRecord,
    pub messages: Vec<MessageView>,
    pub participant_ids: Vec<String>,
    pub actions: Vec<ChatAction>,
    pub roles: Vec<ChatRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinnedChatView {
    pub chat: ChatView,
    pub pinned_chat: PinnedChat,
}

// -- Notification side --

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBriefInfo {
    pub user_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatBriefInfo {
    pub chat_id: i64,
    pub creator_id: String,
    pub name: String,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ChatRecord> for ChatBriefInfo {
    fn from(chat: &ChatRecord) -> Self {
        Self {
            chat_id: chat.chat_id,
            creator_id: chat.creator_id.clone(),
            name: chat.name.clone(),
            encrypted: chat.encrypted,
            avatar_url: chat.avatar_url.clone(),
            updated_at: chat.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBriefInfo {
    pub message_id: i64,
    pub sender_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub updated_at: DateTime<Utc>,
}

impl From<&MessageRecord> for MessageBriefInfo {
    fn from(message: &MessageRecord) -> Self {
        Self {
            message_id: message.message_id,
            sender_id: message.sender_id.clone(),
            message_type: message.message_type,
            updated_at: message.created_at,
        }
    }
}

/// Per-user mute setting for a chat. A mute whose `term` has passed no longer applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteSetting {
    #[serde(default)]
    pub user_id: String,
    pub chat_id: i64,
    pub mute: bool,
    #[serde(default)]
    pub term: Option<DateTime<Utc>>,
}

use serde::{Deserialize, Serialize};

use crate::api::CreatePrivateChatResponse;
use crate::models::{ChatBriefInfo, ChatRecord, MessageBriefInfo, MessagePayload, UserBriefInfo};

pub const FRAME_SEND_MESSAGE: &str = "send message";
pub const FRAME_CREATE_PRIVATE_CHAT: &str = "create private chat";
pub const FRAME_CREATE_GROUP_CHAT: &str = "create group chat";
pub const FRAME_MESSAGE_ACTION: &str = "action on message";
pub const FRAME_CHAT_ACTION: &str = "action on chat";

/// Envelope of every frame a client sends over the WebSocket.
/// Only the `type` discriminator is read here; the body is decoded per type.
#[derive(Debug, Deserialize)]
pub struct FrameEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Events pushed FROM server TO client over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// A message was posted to a chat the client participates in
    MessageCreate {
        chat_id: i64,
        payload: MessagePayload,
    },

    /// A private chat was opened with the client
    PrivateChatCreate(CreatePrivateChatResponse),

    /// The client was added to a new group chat
    GroupChatCreate {
        chat: ChatRecord,
        participant_ids: Vec<String>,
    },
}

/// Broker body published on `chat.created` for an offline recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChat {
    pub chat: ChatBriefInfo,
    pub sender: UserBriefInfo,
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_action: Option<String>,
}

/// Broker body published on `message.send` for an offline recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub chat: ChatBriefInfo,
    pub message: MessageBriefInfo,
    pub sender: UserBriefInfo,
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_action: Option<String>,
}

/// Unread notifications handed to a client by the notification service.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NotificationFeed {
    pub messages: Vec<NotificationMessage>,
    pub chats: Vec<NotificationChat>,
    pub muted_chats: Vec<ChatBriefInfo>,
}

use serde::{Deserialize, Serialize};

use crate::models::{
    ChatAction, ChatRecord, ChatView, MessagePayload, MessageView, PinnedChatView, UserBriefInfo,
};

// -- JWT Claims --

/// Claims carried by access tokens. `sub` is the opaque user id issued by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

// -- Errors --

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

// -- Chats --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    #[serde(default)]
    pub chat_id: i64,
    #[serde(rename = "first_message")]
    pub message: MessagePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrivateChatRequest {
    pub chat: ChatRecord,
    pub recipient_id: String,
    pub initial_message: CreateMessageRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePrivateChatResponse {
    pub chat: ChatRecord,
    pub recipient_id: String,
    pub message: MessageView,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroupChatRequest {
    pub chat: ChatRecord,
    pub participant_ids: Vec<String>,
    pub chat_action: ChatAction,
}

/// Everything a client needs to render its chat list after connecting.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessengerInit {
    pub chats: Vec<ChatView>,
    pub pinned_chats: Vec<PinnedChatView>,
    pub users_profile: Vec<UserBriefInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub message: String,
}

// -- Profile service --

#[derive(Debug, Serialize, Deserialize)]
pub struct BriefInfoRequest {
    pub sender_id: String,
    pub recipient_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BriefInfosRequest {
    pub sender_id: String,
    pub recipient_ids: Vec<String>,
}

use std::sync::Arc;

use murmur_chat::{ChatAggregator, ChatSettings, ProfileClient};

pub type ChatState = Arc<ChatApiState>;

pub struct ChatApiState {
    pub aggregator: ChatAggregator,
    pub settings: ChatSettings,
    pub profiles: Arc<dyn ProfileClient>,
}

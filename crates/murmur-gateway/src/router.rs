use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use murmur_broker::topology::{
    CHAT_CREATED_KEY, CHAT_EXCHANGE, MESSAGE_EXCHANGE, MESSAGE_SEND_KEY,
};
use murmur_broker::{Publisher, publish_json};
use murmur_chat::{ProfileClient, SentMessage};
use murmur_crypto::MessageCipher;
use murmur_types::Result;
use murmur_types::api::CreatePrivateChatResponse;
use murmur_types::events::{NotificationChat, NotificationMessage, ServerEvent};
use murmur_types::models::{
    CHAT_ACTION_CREATE, ChatBriefInfo, ChatRecord, ChatView, MESSAGE_ACTION_SEND,
    MessageBriefInfo, MessagePayload, UserBriefInfo,
};

/// Something that happened and must reach the chat's other participants.
#[derive(Debug, Clone)]
pub enum DeliveryEvent {
    MessageSent(SentMessage),
    PrivateChatCreated(CreatePrivateChatResponse),
    GroupChatCreated(ChatView),
}

impl DeliveryEvent {
    /// Whoever caused the event; they are never among its recipients.
    pub fn sender_id(&self) -> &str {
        match self {
            Self::MessageSent(sent) => &sent.payload.message.sender_id,
            Self::PrivateChatCreated(resp) => &resp.chat.creator_id,
            Self::GroupChatCreated(view) => &view.chat.creator_id,
        }
    }

    pub fn chat(&self) -> &ChatRecord {
        match self {
            Self::MessageSent(sent) => &sent.chat,
            Self::PrivateChatCreated(resp) => &resp.chat,
            Self::GroupChatCreated(view) => &view.chat,
        }
    }

    /// Participants other than the sender.
    pub fn recipients(&self) -> Vec<String> {
        let sender = self.sender_id();
        let all: &[String] = match self {
            Self::MessageSent(sent) => &sent.participant_ids,
            Self::PrivateChatCreated(resp) => std::slice::from_ref(&resp.recipient_id),
            Self::GroupChatCreated(view) => &view.participant_ids,
        };
        all.iter().filter(|id| *id != sender).cloned().collect()
    }

    fn message(&self) -> Option<&MessagePayload> {
        match self {
            Self::MessageSent(sent) => Some(&sent.payload),
            Self::PrivateChatCreated(resp) => Some(&resp.message.payload),
            Self::GroupChatCreated(_) => None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub pushed: usize,
    pub published: usize,
    pub failed: usize,
}

enum Outcome {
    Pushed,
    Published,
    Failed,
}

/// Pushes events to online recipients and publishes durable notifications
/// for everyone else. Recipients are handled independently and in parallel.
pub struct DeliveryRouter {
    presence: Arc<crate::PresenceRegistry>,
    cipher: Arc<MessageCipher>,
    profiles: Arc<dyn ProfileClient>,
    publisher: Arc<dyn Publisher>,
}

impl DeliveryRouter {
    pub fn new(
        presence: Arc<crate::PresenceRegistry>,
        cipher: Arc<MessageCipher>,
        profiles: Arc<dyn ProfileClient>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            presence,
            cipher,
            profiles,
            publisher,
        }
    }

    /// The push payload for `event`, with message content decrypted.
    pub fn render(&self, event: &DeliveryEvent) -> Result<ServerEvent> {
        Ok(match event {
            DeliveryEvent::MessageSent(sent) => {
                let mut payload = sent.payload.clone();
                self.cipher.open(&mut payload.message.content)?;
                ServerEvent::MessageCreate {
                    chat_id: sent.chat.chat_id,
                    payload,
                }
            }
            DeliveryEvent::PrivateChatCreated(resp) => {
                let mut resp = resp.clone();
                self.cipher.open(&mut resp.message.payload.message.content)?;
                ServerEvent::PrivateChatCreate(resp)
            }
            DeliveryEvent::GroupChatCreated(view) => ServerEvent::GroupChatCreate {
                chat: view.chat.clone(),
                participant_ids: view.participant_ids.clone(),
            },
        })
    }

    pub async fn deliver(&self, event: &DeliveryEvent, recipients: &[String]) -> DeliveryReport {
        let rendered = match self.render(event) {
            Ok(rendered) => Some(rendered),
            Err(e) => {
                warn!("Cannot render chat {} for push: {}", event.chat().chat_id, e);
                None
            }
        };

        let outcomes = join_all(
            recipients
                .iter()
                .map(|recipient| self.deliver_one(event, rendered.as_ref(), recipient)),
        )
        .await;

        let mut report = DeliveryReport::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Pushed => report.pushed += 1,
                Outcome::Published => report.published += 1,
                Outcome::Failed => report.failed += 1,
            }
        }
        debug!(
            "Chat {}: pushed {}, published {}, failed {}",
            event.chat().chat_id,
            report.pushed,
            report.published,
            report.failed
        );
        report
    }

    async fn deliver_one(
        &self,
        event: &DeliveryEvent,
        rendered: Option<&ServerEvent>,
        recipient: &str,
    ) -> Outcome {
        let handle = match self.presence.lookup(recipient).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Presence lookup for {} failed, falling back: {}", recipient, e);
                None
            }
        };

        if let Some(handle) = handle {
            let Some(rendered) = rendered else {
                return Outcome::Failed;
            };
            return match handle.push(rendered) {
                Ok(()) => Outcome::Pushed,
                Err(e) => {
                    warn!("Push to {} failed: {}", recipient, e);
                    Outcome::Failed
                }
            };
        }

        let sender = match self.profiles.brief_info(event.sender_id(), recipient).await {
            Ok(sender) => sender,
            Err(e) => {
                warn!("Profile of {} unavailable, no notification for {}: {}", event.sender_id(), recipient, e);
                return Outcome::Failed;
            }
        };

        match self.publish_fallback(event, sender, recipient).await {
            Ok(()) => {
                info!("{} offline, notification published", recipient);
                Outcome::Published
            }
            Err(e) => {
                warn!("Publishing notification for {} failed: {}", recipient, e);
                Outcome::Failed
            }
        }
    }

    async fn publish_fallback(
        &self,
        event: &DeliveryEvent,
        sender: UserBriefInfo,
        recipient: &str,
    ) -> Result<()> {
        let chat = ChatBriefInfo::from(event.chat());

        if !matches!(event, DeliveryEvent::MessageSent(_)) {
            let note = NotificationChat {
                chat: chat.clone(),
                sender: sender.clone(),
                recipient_id: recipient.to_string(),
                chat_action: Some(CHAT_ACTION_CREATE.to_string()),
            };
            publish_json(self.publisher.as_ref(), CHAT_EXCHANGE, CHAT_CREATED_KEY, &note).await?;
        }

        if let Some(payload) = event.message() {
            let note = NotificationMessage {
                chat,
                message: MessageBriefInfo::from(&payload.message),
                sender,
                recipient_id: recipient.to_string(),
                message_action: Some(MESSAGE_ACTION_SEND.to_string()),
            };
            publish_json(self.publisher.as_ref(), MESSAGE_EXCHANGE, MESSAGE_SEND_KEY, &note).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::{ConnHandle, PresenceRegistry};
    use crate::ttl::SqliteTtlStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use murmur_crypto::keys::generate_message_key;
    use murmur_db::Database;
    use murmur_types::Error;
    use murmur_types::models::ChatType;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, String, serde_json::Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, exchange: &str, key: &str, body: Vec<u8>, _: &str) -> Result<()> {
            if self.fail {
                return Err(Error::UpstreamTransient("broker down".into()));
            }
            let value = serde_json::from_slice(&body).unwrap();
            self.sent.lock().unwrap().push((exchange.into(), key.into(), value));
            Ok(())
        }
    }

    struct StaticProfiles;

    #[async_trait]
    impl ProfileClient for StaticProfiles {
        async fn brief_info(&self, sender_id: &str, _: &str) -> Result<UserBriefInfo> {
            Ok(UserBriefInfo {
                user_id: sender_id.into(),
                username: sender_id.into(),
                name: sender_id.to_uppercase(),
                avatar_url: None,
            })
        }
        async fn brief_infos(&self, _: &str, _: &[String]) -> Result<Vec<UserBriefInfo>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        presence: Arc<PresenceRegistry>,
        publisher: Arc<RecordingPublisher>,
        router: DeliveryRouter,
        cipher: Arc<MessageCipher>,
    }

    fn fixture(fail_publish: bool) -> Fixture {
        let store = Arc::new(SqliteTtlStore::new(Arc::new(Database::open_in_memory().unwrap())));
        let presence = PresenceRegistry::new(store, Duration::from_secs(60));
        let cipher = Arc::new(MessageCipher::new(&generate_message_key()));
        let publisher = Arc::new(RecordingPublisher {
            fail: fail_publish,
            ..Default::default()
        });
        let router = DeliveryRouter::new(
            presence.clone(),
            cipher.clone(),
            Arc::new(StaticProfiles),
            publisher.clone(),
        );
        Fixture {
            presence,
            publisher,
            router,
            cipher,
        }
    }

    fn sent(cipher: &MessageCipher, participants: &[&str]) -> DeliveryEvent {
        let now = Utc::now();
        let mut payload = MessagePayload::text("alice", "hello bob");
        payload.message.message_id = 42;
        cipher.seal(&mut payload.message.content).unwrap();
        DeliveryEvent::MessageSent(SentMessage {
            chat: ChatRecord {
                chat_id: 7,
                creator_id: "alice".into(),
                name: "pair".into(),
                description: None,
                chat_type: ChatType::Private,
                encrypted: false,
                avatar_url: None,
                created_at: now,
                updated_at: now,
            },
            participant_ids: participants.iter().map(|s| s.to_string()).collect(),
            payload,
        })
    }

    #[tokio::test]
    async fn online_recipient_gets_plaintext_push() {
        let fx = fixture(false);
        let (handle, mut rx) = ConnHandle::channel();
        fx.presence.register("bob", handle).await.unwrap();

        let event = sent(&fx.cipher, &["alice", "bob"]);
        let report = fx.router.deliver(&event, &event.recipients()).await;
        assert_eq!(report, DeliveryReport { pushed: 1, published: 0, failed: 0 });

        let pushed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["data"]["payload"]["message"]["content"], "hello bob");
        assert_eq!(pushed["data"]["chat_id"], 7);
        assert!(fx.publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn offline_recipient_gets_a_message_notification() {
        let fx = fixture(false);
        let event = sent(&fx.cipher, &["alice", "bob"]);
        let report = fx.router.deliver(&event, &event.recipients()).await;
        assert_eq!(report.published, 1);

        let sent = fx.publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (exchange, key, body) = &sent[0];
        assert_eq!(exchange, MESSAGE_EXCHANGE);
        assert_eq!(key, MESSAGE_SEND_KEY);
        assert_eq!(body["recipient_id"], "bob");
        assert_eq!(body["message"]["message_id"], 42);
        assert_eq!(body["sender"]["name"], "ALICE");
    }

    #[tokio::test]
    async fn one_failure_does_not_block_others() {
        let fx = fixture(true);
        let (handle, _rx) = ConnHandle::channel();
        fx.presence.register("carol", handle).await.unwrap();

        let event = sent(&fx.cipher, &["alice", "bob", "carol"]);
        let report = fx.router.deliver(&event, &event.recipients()).await;
        assert_eq!(report, DeliveryReport { pushed: 1, published: 0, failed: 1 });
    }

    #[test]
    fn sender_is_not_a_recipient() {
        let cipher = MessageCipher::new(&generate_message_key());
        let event = sent(&cipher, &["alice", "bob", "carol"]);
        assert_eq!(event.recipients(), vec!["bob".to_string(), "carol".to_string()]);
    }
}

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use murmur_chat::ChatPipeline;
use murmur_crypto::MessageCipher;
use murmur_types::api::{CreateGroupChatRequest, CreateMessageRequest, CreatePrivateChatRequest};
use murmur_types::events::{
    FRAME_CHAT_ACTION, FRAME_CREATE_GROUP_CHAT, FRAME_CREATE_PRIVATE_CHAT, FRAME_MESSAGE_ACTION,
    FRAME_SEND_MESSAGE, FrameEnvelope,
};
use murmur_types::{Error, Result};

use crate::presence::{ConnHandle, PresenceRegistry};
use crate::router::{DeliveryEvent, DeliveryReport, DeliveryRouter};

/// Upper bound on one client action, persistence and delivery included.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a WebSocket connection needs to act on client frames.
#[derive(Clone)]
pub struct Gateway {
    pub presence: Arc<PresenceRegistry>,
    pipeline: ChatPipeline,
    router: Arc<DeliveryRouter>,
    cipher: Arc<MessageCipher>,
}

impl Gateway {
    pub fn new(
        presence: Arc<PresenceRegistry>,
        pipeline: ChatPipeline,
        router: Arc<DeliveryRouter>,
        cipher: Arc<MessageCipher>,
    ) -> Self {
        Self {
            presence,
            pipeline,
            router,
            cipher,
        }
    }

    /// Runs one text frame from `user_id`. The acting user always comes from
    /// the authenticated connection, never from the frame.
    /// Returns `None` for frames that trigger no delivery.
    pub async fn handle_frame(
        &self,
        user_id: &str,
        conn: &ConnHandle,
        text: &str,
    ) -> Result<Option<DeliveryReport>> {
        let envelope: FrameEnvelope = parse(text)?;
        let kind = envelope.kind.as_str();

        tokio::time::timeout(ACTION_TIMEOUT, self.run(kind, user_id, conn, text))
            .await
            .map_err(|_| Error::UpstreamTransient(format!("'{}' timeout", kind)))?
    }

    async fn run(
        &self,
        kind: &str,
        user_id: &str,
        conn: &ConnHandle,
        text: &str,
    ) -> Result<Option<DeliveryReport>> {
        let event = match kind {
            FRAME_SEND_MESSAGE => {
                let mut req: CreateMessageRequest = parse(text)?;
                req.message.message.sender_id = user_id.to_string();
                self.cipher.seal(&mut req.message.message.content)?;

                DeliveryEvent::MessageSent(self.pipeline.send_message(req).await?)
            }
            FRAME_CREATE_PRIVATE_CHAT => {
                let mut req: CreatePrivateChatRequest = parse(text)?;
                req.chat.creator_id = user_id.to_string();
                let message = &mut req.initial_message.message.message;
                message.sender_id = user_id.to_string();
                self.cipher.seal(&mut message.content)?;

                DeliveryEvent::PrivateChatCreated(self.pipeline.create_private_chat(req).await?)
            }
            FRAME_CREATE_GROUP_CHAT => {
                let mut req: CreateGroupChatRequest = parse(text)?;
                req.chat.creator_id = user_id.to_string();
                req.chat_action.user_id = user_id.to_string();

                DeliveryEvent::GroupChatCreated(self.pipeline.create_group_chat(req).await?)
            }
            FRAME_MESSAGE_ACTION | FRAME_CHAT_ACTION => {
                info!("{} sent '{}', which is not implemented yet", user_id, kind);
                return Ok(None);
            }
            other => {
                warn!("{} sent unknown frame type '{}'", user_id, other);
                return Ok(None);
            }
        };

        self.dispatch(conn, event).await.map(Some)
    }

    /// Echoes the event to the acting connection, then delivers it to everyone else.
    async fn dispatch(&self, conn: &ConnHandle, event: DeliveryEvent) -> Result<DeliveryReport> {
        match self.router.render(&event) {
            Ok(echo) => {
                if let Err(e) = conn.push(&echo) {
                    debug!("Echo to {} dropped: {}", event.sender_id(), e);
                }
            }
            Err(e) => warn!("Cannot render echo for {}: {}", event.sender_id(), e),
        }

        let recipients = event.recipients();
        Ok(self.router.deliver(&event, &recipients).await)
    }
}

fn parse<T: DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ttl::SqliteTtlStore;
    use async_trait::async_trait;
    use murmur_broker::Publisher;
    use murmur_chat::ProfileClient;
    use murmur_crypto::keys::generate_message_key;
    use murmur_db::{Database, MessageRepository, Repositories};
    use murmur_types::models::UserBriefInfo;
    use serde_json::json;

    struct NoBroker;

    #[async_trait]
    impl Publisher for NoBroker {
        async fn publish(&self, _: &str, _: &str, _: Vec<u8>, _: &str) -> Result<()> {
            Err(Error::UpstreamTransient("connection refused".into()))
        }
    }

    struct NoProfiles;

    #[async_trait]
    impl ProfileClient for NoProfiles {
        async fn brief_info(&self, _: &str, _: &str) -> Result<UserBriefInfo> {
            Err(Error::not_found("profile"))
        }
        async fn brief_infos(&self, _: &str, _: &[String]) -> Result<Vec<UserBriefInfo>> {
            Ok(Vec::new())
        }
    }

    fn gateway() -> (Arc<Database>, Gateway) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let presence = PresenceRegistry::new(
            Arc::new(SqliteTtlStore::new(db.clone())),
            Duration::from_secs(60),
        );
        let cipher = Arc::new(MessageCipher::new(&generate_message_key()));
        let router = Arc::new(DeliveryRouter::new(
            presence.clone(),
            cipher.clone(),
            Arc::new(NoProfiles),
            Arc::new(NoBroker),
        ));
        let pipeline = ChatPipeline::new(Repositories::sqlite(db.clone()));
        (db, Gateway::new(presence, pipeline, router, cipher))
    }

    fn private_chat_frame(recipient: &str) -> String {
        json!({
            "type": "create private chat",
            "chat": { "creator_id": "mallory", "name": "pair", "type": "private" },
            "recipient_id": recipient,
            "initial_message": {
                "first_message": {
                    "message": { "sender_id": "mallory", "content": "hi", "status": "sent", "type": "text" }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn private_chat_is_created_as_the_connected_user() {
        let (db, gateway) = gateway();
        let (alice, mut alice_rx) = ConnHandle::channel();
        let (bob, mut bob_rx) = ConnHandle::channel();
        gateway.presence.register("bob", bob).await.unwrap();

        let report = gateway
            .handle_frame("alice", &alice, &private_chat_frame("bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.pushed, 1);

        let echo: serde_json::Value = serde_json::from_str(&alice_rx.recv().await.unwrap()).unwrap();
        assert_eq!(echo["type"], "PrivateChatCreate");
        assert_eq!(echo["data"]["chat"]["creator_id"], "alice");

        let pushed: serde_json::Value = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["data"]["message"]["message"]["content"], "hi");

        // stored encrypted
        let id = pushed["data"]["message"]["message"]["message_id"].as_i64().unwrap();
        let stored = db.get_message(id).await.unwrap();
        assert_eq!(stored.sender_id, "alice");
        assert_ne!(stored.content.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn reserved_and_unknown_frames_do_nothing() {
        let (_, gateway) = gateway();
        let (conn, _rx) = ConnHandle::channel();
        for kind in ["action on message", "action on chat", "dance"] {
            let frame = json!({ "type": kind }).to_string();
            assert!(gateway.handle_frame("alice", &conn, &frame).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_invalid_data() {
        let (_, gateway) = gateway();
        let (conn, _rx) = ConnHandle::channel();
        let err = gateway
            .handle_frame("alice", &conn, r#"{"type":"send message","chat_id":"x"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid data"));
        assert!(gateway.handle_frame("alice", &conn, "not json").await.is_err());
    }

    #[tokio::test]
    async fn offline_recipient_counts_as_failed_without_broker() {
        let (_, gateway) = gateway();
        let (alice, _rx) = ConnHandle::channel();
        let report = gateway
            .handle_frame("alice", &alice, &private_chat_frame("bob"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report, DeliveryReport { pushed: 0, published: 0, failed: 1 });
    }
}

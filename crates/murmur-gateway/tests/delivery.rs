//! End-to-end delivery: a message sent over the gateway either reaches an
//! online recipient directly or lands in the notification store through the
//! broker.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use murmur_broker::{Publisher, SqliteBroker, topology};
use murmur_chat::{ChatPipeline, ProfileClient};
use murmur_crypto::MessageCipher;
use murmur_crypto::keys::generate_message_key;
use murmur_db::{ChatRepository, Database, MessageRepository, NotificationRepository, Repositories};
use murmur_gateway::{ConnHandle, DeliveryRouter, Gateway, PresenceRegistry, SqliteTtlStore};
use murmur_notify::{Consumer, MessageSentHandler};
use murmur_types::Result;
use murmur_types::models::{ChatRecord, ChatType, UserBriefInfo};

/// Forwards to the real broker and counts what went through.
struct CountingPublisher {
    broker: SqliteBroker,
    published: AtomicUsize,
}

#[async_trait]
impl Publisher for CountingPublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.published.fetch_add(1, Ordering::SeqCst);
        self.broker
            .publish(exchange, routing_key, body, content_type)
            .await
    }
}

struct Profiles;

#[async_trait]
impl ProfileClient for Profiles {
    async fn brief_info(&self, sender_id: &str, _recipient_id: &str) -> Result<UserBriefInfo> {
        Ok(UserBriefInfo {
            user_id: sender_id.to_string(),
            username: sender_id.to_string(),
            name: "Alice".into(),
            avatar_url: None,
        })
    }

    async fn brief_infos(&self, _: &str, _: &[String]) -> Result<Vec<UserBriefInfo>> {
        Ok(Vec::new())
    }
}

struct Harness {
    db: Arc<Database>,
    broker: SqliteBroker,
    publisher: Arc<CountingPublisher>,
    gateway: Gateway,
    chat_id: i64,
}

async fn harness() -> Harness {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let broker = SqliteBroker::open_in_memory().unwrap();
    topology::declare(&broker).unwrap();
    let publisher = Arc::new(CountingPublisher {
        broker: broker.clone(),
        published: AtomicUsize::new(0),
    });

    let presence = PresenceRegistry::new(
        Arc::new(SqliteTtlStore::new(db.clone())),
        Duration::from_secs(60),
    );
    let cipher = Arc::new(MessageCipher::new(&generate_message_key()));
    let router = Arc::new(DeliveryRouter::new(
        presence.clone(),
        cipher.clone(),
        Arc::new(Profiles),
        publisher.clone(),
    ));
    let gateway = Gateway::new(
        presence,
        ChatPipeline::new(Repositories::sqlite(db.clone())),
        router,
        cipher,
    );

    let now = Utc::now();
    let chat = db
        .create_chat(&ChatRecord {
            chat_id: 0,
            creator_id: "alice".into(),
            name: "alice & bob".into(),
            description: None,
            chat_type: ChatType::Private,
            encrypted: false,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    db.add_participant(chat.chat_id, "alice").await.unwrap();
    db.add_participant(chat.chat_id, "bob").await.unwrap();

    Harness {
        db,
        broker,
        publisher,
        gateway,
        chat_id: chat.chat_id,
    }
}

fn send_frame(chat_id: i64, content: &str) -> String {
    json!({
        "type": "send message",
        "chat_id": chat_id,
        "first_message": {
            "message": { "sender_id": "alice", "content": content, "status": "sent", "type": "text" }
        }
    })
    .to_string()
}

#[tokio::test]
async fn online_recipient_gets_decrypted_push_and_nothing_is_published() {
    let h = harness().await;
    let (alice, _alice_rx) = ConnHandle::channel();
    let (bob, mut bob_rx) = ConnHandle::channel();
    h.gateway.presence.register("bob", bob).await.unwrap();

    let report = h
        .gateway
        .handle_frame("alice", &alice, &send_frame(h.chat_id, "hello bob"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(report.published, 0);

    let pushed: serde_json::Value = serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
    assert_eq!(pushed["type"], "MessageCreate");
    assert_eq!(pushed["data"]["chat_id"], h.chat_id);
    assert_eq!(pushed["data"]["payload"]["message"]["content"], "hello bob");

    let message_id = pushed["data"]["payload"]["message"]["message_id"].as_i64().unwrap();
    let stored = h.db.messages_for_chat(h.chat_id, 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message_id, message_id);

    assert_eq!(h.publisher.published.load(Ordering::SeqCst), 0);
    assert_eq!(h.broker.ready_count(topology::MESSAGE_SEND_QUEUE).unwrap(), 0);
}

#[tokio::test]
async fn offline_recipient_is_notified_through_the_broker() {
    let h = harness().await;
    let (alice, _alice_rx) = ConnHandle::channel();

    let report = h
        .gateway
        .handle_frame("alice", &alice, &send_frame(h.chat_id, "are you there?"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.published, 1);
    assert_eq!(h.publisher.published.load(Ordering::SeqCst), 1);
    assert_eq!(h.broker.ready_count(topology::MESSAGE_SEND_QUEUE).unwrap(), 1);

    let consumer = Consumer::new(
        topology::MESSAGE_EXCHANGE,
        topology::MESSAGE_SEND_QUEUE,
        topology::MESSAGE_SEND_KEY,
        Arc::new(MessageSentHandler::new(h.db.clone())),
    )
    .spawn(Arc::new(h.broker.clone()));

    let mut stored = 0;
    for _ in 0..100 {
        stored = h
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM message_notifications WHERE recipient_id = 'bob' AND is_read = 0",
                    [],
                    |row| row.get::<_, i64>(0),
                )
            })
            .unwrap();
        if stored > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    consumer.abort();
    assert_eq!(stored, 1);

    let (messages, chats) = h.db.take_unread("bob", Utc::now()).await.unwrap();
    assert!(chats.is_empty());
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].chat.chat_id, h.chat_id);
    assert_eq!(messages[0].sender.user_id, "alice");
    assert_eq!(messages[0].recipient_id, "bob");
}

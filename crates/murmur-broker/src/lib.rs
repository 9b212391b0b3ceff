//! Message broker plumbing: publisher/subscriber traits, the topic topology
//! shared by the chat and notification services, and a durable broker backed
//! by SQLite.
//!
//! Delivery is at-least-once. A consumer receives one message at a time and
//! must `ack` or `nack` it; messages left unacknowledged by a crashed process
//! are handed out again once their claim lease expires.

pub mod sqlite;
pub mod topology;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use murmur_types::{Error, Result};

pub use sqlite::SqliteBroker;

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;
}

/// Serializes `value` as JSON and publishes it.
pub async fn publish_json<T: Serialize + ?Sized>(
    publisher: &dyn Publisher,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<()> {
    let body = serde_json::to_vec(value).map_err(Error::internal)?;
    publisher
        .publish(exchange, routing_key, body, CONTENT_TYPE_JSON)
        .await
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Starts consuming `queue`. The stream ends when the receiver is dropped.
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>>;
}

/// Settles deliveries with the broker they came from.
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self, tag: i64) -> Result<()>;
    async fn nack(&self, tag: i64, requeue: bool) -> Result<()>;
}

pub struct Delivery {
    pub tag: i64,
    pub exchange: String,
    pub routing_key: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub redelivered: bool,
    acker: Arc<dyn Acker>,
}

impl Delivery {
    pub fn new(
        tag: i64,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: Vec<u8>,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            tag,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            body,
            redelivered: false,
            acker,
        }
    }

    pub async fn ack(&self) -> Result<()> {
        self.acker.ack(self.tag).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<()> {
        self.acker.nack(self.tag, requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("len", &self.body.len())
            .finish()
    }
}

/// Topic match: `*` stands for exactly one dot-separated word, `#` for zero or more.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((&word, rest)) => match key.split_first() {
            Some((&k, key_rest)) if word == "*" || word == k => match_words(rest, key_rest),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_key_matches() {
        assert!(topic_matches("message.send", "message.send"));
        assert!(!topic_matches("message.send", "message.send.encrypted"));
    }

    #[test]
    fn star_matches_one_word() {
        assert!(topic_matches("chat.user.*", "chat.user.added"));
        assert!(!topic_matches("chat.*", "chat.user.added"));
    }

    #[test]
    fn hash_matches_any_tail() {
        assert!(topic_matches("chat.#", "chat.created"));
        assert!(topic_matches("chat.#", "chat.user.kicked"));
        assert!(topic_matches("#", "verify_code.email"));
        assert!(!topic_matches("chat.#", "message.send"));
    }
}

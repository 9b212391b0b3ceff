//! Notification service: consumes fallback events published by the chat
//! server for offline recipients, stores them idempotently, and serves each
//! user's unread feed.

pub mod consumer;
pub mod handlers;
pub mod routes;
pub mod service;

pub use consumer::{Consumer, should_requeue};
pub use handlers::{ChatCreatedHandler, DeliveryHandler, MessageSentHandler};
pub use service::NotificationService;

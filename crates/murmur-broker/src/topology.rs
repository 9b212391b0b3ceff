use murmur_types::Result;

use crate::SqliteBroker;

pub const VERIFY_CODE_EXCHANGE: &str = "verify_code_exchange";
pub const CHAT_EXCHANGE: &str = "chat_exchange";
pub const MESSAGE_EXCHANGE: &str = "message_exchange";

pub const VERIFY_CODE_EMAIL_QUEUE: &str = "verify_code_send_to_email_queue";
pub const VERIFY_CODE_PHONE_QUEUE: &str = "verify_code_send_to_phone_queue";
pub const CHAT_CREATED_QUEUE: &str = "chat_created";
pub const CHAT_DELETED_QUEUE: &str = "chat_deleted";
pub const CHAT_ADDED_USER_QUEUE: &str = "chat_added_user";
pub const CHAT_LEFT_USER_QUEUE: &str = "chat_left_user";
pub const CHAT_RENAME_QUEUE: &str = "chat_rename";
pub const CHAT_KICKED_USER_QUEUE: &str = "chat_kicked_user";
pub const MESSAGE_SEND_QUEUE: &str = "message_send";
pub const MESSAGE_SEND_ENCRYPTED_QUEUE: &str = "message_send_encrypted";

pub const VERIFY_CODE_EMAIL_KEY: &str = "verify_code.email";
pub const VERIFY_CODE_PHONE_KEY: &str = "verify_code.phone";
pub const CHAT_CREATED_KEY: &str = "chat.created";
pub const CHAT_DELETED_KEY: &str = "chat.deleted";
pub const CHAT_ADDED_USER_KEY: &str = "chat.user.added";
pub const CHAT_LEFT_USER_KEY: &str = "chat.user.left";
pub const CHAT_RENAMED_KEY: &str = "chat.renamed";
pub const CHAT_KICKED_USER_KEY: &str = "chat.user.kicked";
pub const MESSAGE_SEND_KEY: &str = "message.send";
pub const MESSAGE_SEND_ENCRYPTED_KEY: &str = "message.send.encrypted";

pub const EXCHANGES: &[&str] = &[VERIFY_CODE_EXCHANGE, CHAT_EXCHANGE, MESSAGE_EXCHANGE];

/// `(exchange, queue, routing key)` for every durable queue.
pub const BINDINGS: &[(&str, &str, &str)] = &[
    (VERIFY_CODE_EXCHANGE, VERIFY_CODE_EMAIL_QUEUE, VERIFY_CODE_EMAIL_KEY),
    (VERIFY_CODE_EXCHANGE, VERIFY_CODE_PHONE_QUEUE, VERIFY_CODE_PHONE_KEY),
    (CHAT_EXCHANGE, CHAT_CREATED_QUEUE, CHAT_CREATED_KEY),
    (CHAT_EXCHANGE, CHAT_DELETED_QUEUE, CHAT_DELETED_KEY),
    (CHAT_EXCHANGE, CHAT_ADDED_USER_QUEUE, CHAT_ADDED_USER_KEY),
    (CHAT_EXCHANGE, CHAT_LEFT_USER_QUEUE, CHAT_LEFT_USER_KEY),
    (CHAT_EXCHANGE, CHAT_RENAME_QUEUE, CHAT_RENAMED_KEY),
    (CHAT_EXCHANGE, CHAT_KICKED_USER_QUEUE, CHAT_KICKED_USER_KEY),
    (MESSAGE_EXCHANGE, MESSAGE_SEND_QUEUE, MESSAGE_SEND_KEY),
    (MESSAGE_EXCHANGE, MESSAGE_SEND_ENCRYPTED_QUEUE, MESSAGE_SEND_ENCRYPTED_KEY),
];

/// Declares every exchange, queue and binding. Safe to run on each start.
pub fn declare(broker: &SqliteBroker) -> Result<()> {
    for exchange in EXCHANGES {
        broker.declare_exchange(exchange)?;
    }
    for (exchange, queue, key) in BINDINGS {
        broker.declare_queue(queue)?;
        broker.bind(queue, exchange, key)?;
    }
    Ok(())
}

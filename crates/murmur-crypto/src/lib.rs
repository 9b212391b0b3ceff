//! Murmur crypto collaborators.
//!
//! - `cipher`: symmetric AES-256-GCM encryption of message content at rest.
//! - `token`: verification of access tokens issued by the auth service.
//!
//! The chat service only ever stores ciphertext; plaintext exists transiently
//! while building push payloads for live recipients.

pub mod cipher;
pub mod keys;
pub mod token;

pub use cipher::MessageCipher;
pub use token::TokenValidator;

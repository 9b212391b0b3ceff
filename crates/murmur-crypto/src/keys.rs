use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use murmur_types::{Error, Result};

/// Generate a random 256-bit key for AES-256-GCM.
pub fn generate_message_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encode a key to base64 for configuration files.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Decode a base64 key, as read from `MURMUR_MESSAGE_KEY`.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32]> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| Error::Validation(format!("message key is not base64: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| Error::Validation("message key must be 32 bytes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_survives_base64() {
        let key = generate_message_key();
        assert_eq!(key_from_base64(&key_to_base64(&key)).unwrap(), key);
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(key_from_base64(&BASE64.encode([1u8; 16])).is_err());
    }
}

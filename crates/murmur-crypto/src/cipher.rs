use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use murmur_types::{Error, Result};

const NONCE_LEN: usize = 12;

/// Encrypts message content with a server-held AES-256-GCM key.
/// Ciphertext is encoded as base64(nonce || ciphertext) so it can live in a TEXT column.
#[derive(Clone)]
pub struct MessageCipher {
    cipher: Aes256Gcm,
}

impl MessageCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::Internal(format!("failed to encrypt message: {}", e)))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = BASE64
            .decode(encoded)
            .map_err(|e| Error::Validation(format!("ciphertext is not base64: {}", e)))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Validation("ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Internal(format!("failed to decrypt message: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| Error::Internal(format!("decrypted message is not utf-8: {}", e)))
    }

    /// Encrypts `content` in place when present.
    pub fn seal(&self, content: &mut Option<String>) -> Result<()> {
        if let Some(text) = content.as_mut() {
            *text = self.encrypt(text)?;
        }
        Ok(())
    }

    /// Decrypts `content` in place when present.
    pub fn open(&self, content: &mut Option<String>) -> Result<()> {
        if let Some(text) = content.as_mut() {
            *text = self.decrypt(text)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_message_key;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = MessageCipher::new(&generate_message_key());
        let message = "Hello from Murmur!";

        let sealed = cipher.encrypt(message).unwrap();
        assert_ne!(sealed, message);
        assert_eq!(cipher.decrypt(&sealed).unwrap(), message);
    }

    #[test]
    fn wrong_key_fails() {
        let a = MessageCipher::new(&generate_message_key());
        let b = MessageCipher::new(&generate_message_key());

        let sealed = a.encrypt("Secret message").unwrap();
        assert!(b.decrypt(&sealed).is_err());
    }

    #[test]
    fn seal_leaves_missing_content_alone() {
        let cipher = MessageCipher::new(&generate_message_key());
        let mut content = None;
        cipher.seal(&mut content).unwrap();
        assert!(content.is_none());

        let mut content = Some("hi".to_string());
        cipher.seal(&mut content).unwrap();
        cipher.open(&mut content).unwrap();
        assert_eq!(content.as_deref(), Some("hi"));
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let cipher = MessageCipher::new(&generate_message_key());
        assert!(matches!(cipher.decrypt("%%%"), Err(Error::Validation(_))));
    }
}

use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::debug;

use murmur_types::api::Claims;
use murmur_types::{Error, Result};

/// Validates HS256 access tokens issued by the auth service and yields the user id.
#[derive(Clone)]
pub struct TokenValidator {
    key: DecodingKey,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn validate(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.key, &Validation::default()).map_err(|e| {
            debug!("rejected access token: {}", e);
            Error::Validation("invalid token".into())
        })?;

        if data.claims.sub.is_empty() {
            return Err(Error::Validation("token has no subject".into()));
        }
        Ok(data.claims.sub)
    }
}

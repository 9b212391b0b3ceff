use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use murmur_crypto::keys;

/// Chat server settings, read from `MURMUR_*` environment variables.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub broker_path: PathBuf,
    pub jwt_secret: String,
    pub message_key: [u8; 32],
    pub profile_url: String,
    pub presence_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let jwt_secret = var("MURMUR_JWT_SECRET", "dev-secret-change-me");
        let message_key = match std::env::var("MURMUR_MESSAGE_KEY") {
            Ok(encoded) => keys::key_from_base64(&encoded).context("MURMUR_MESSAGE_KEY")?,
            Err(_) => {
                warn!("MURMUR_MESSAGE_KEY not set, using a throwaway key; stored messages will not decrypt after restart");
                keys::generate_message_key()
            }
        };

        Ok(Self {
            host: var("MURMUR_HOST", "0.0.0.0"),
            port: var("MURMUR_PORT", "3000").parse().context("MURMUR_PORT")?,
            db_path: PathBuf::from(var("MURMUR_DB_PATH", "murmur.db")),
            broker_path: PathBuf::from(var("MURMUR_BROKER_PATH", "murmur-broker.db")),
            jwt_secret,
            message_key,
            profile_url: var("MURMUR_PROFILE_URL", "http://127.0.0.1:3100"),
            presence_ttl: Duration::from_secs(
                var("MURMUR_PRESENCE_TTL_SECS", "60")
                    .parse()
                    .context("MURMUR_PRESENCE_TTL_SECS")?,
            ),
            sweep_interval: Duration::from_secs(1),
        })
    }
}

fn var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

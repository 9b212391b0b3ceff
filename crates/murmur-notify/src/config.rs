use std::path::PathBuf;

use anyhow::Context;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub broker_path: PathBuf,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: var("MURMUR_HOST", "0.0.0.0"),
            port: var("MURMUR_NOTIFY_PORT", "3001")
                .parse()
                .context("MURMUR_NOTIFY_PORT")?,
            db_path: PathBuf::from(var("MURMUR_DB_PATH", "murmur.db")),
            broker_path: PathBuf::from(var("MURMUR_BROKER_PATH", "murmur-broker.db")),
            jwt_secret: var("MURMUR_JWT_SECRET", "dev-secret-change-me"),
        })
    }
}

fn var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use murmur_db::Database;
use murmur_types::Result;

/// Key/value store whose entries expire, with a feed of expired keys.
#[async_trait]
pub trait TtlStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// `None` once the key is gone or past its deadline.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Pushes the deadline out. Returns false if the key already expired.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;
    async fn delete(&self, key: &str) -> Result<()>;
    /// Keys removed because their deadline passed.
    fn subscribe_expired(&self) -> broadcast::Receiver<String>;
}

/// TTL store over the `presence_keys` table.
///
/// SQLite cannot push expiry events, so [`run_sweeper`] periodically deletes
/// expired rows and announces their keys.
pub struct SqliteTtlStore {
    db: Arc<Database>,
    expired_tx: broadcast::Sender<String>,
}

fn deadline(ttl: Duration) -> i64 {
    Utc::now().timestamp_millis() + ttl.as_millis() as i64
}

impl SqliteTtlStore {
    pub fn new(db: Arc<Database>) -> Self {
        let (expired_tx, _) = broadcast::channel(1024);
        Self { db, expired_tx }
    }

    /// Deletes every expired key and announces it. Returns how many were swept.
    pub fn sweep(&self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let expired: Vec<String> = self.db.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let keys = {
                let mut stmt = tx.prepare("SELECT key FROM presence_keys WHERE expires_at <= ?1")?;
                let rows = stmt.query_map(params![now], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.execute("DELETE FROM presence_keys WHERE expires_at <= ?1", params![now])?;
            tx.commit()?;
            Ok(keys)
        })?;

        for key in &expired {
            // no subscribers is fine
            let _ = self.expired_tx.send(key.clone());
        }
        Ok(expired.len())
    }
}

#[async_trait]
impl TtlStore for SqliteTtlStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO presence_keys (key, value, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                params![key, value, deadline(ttl)],
            )?;
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Utc::now().timestamp_millis();
        self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT value FROM presence_keys WHERE key = ?1 AND expires_at > ?2")?;
            let mut rows = stmt.query(params![key, now])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE presence_keys SET expires_at = ?3 WHERE key = ?1 AND expires_at > ?2",
                params![key, now, deadline(ttl)],
            )
        })?;
        Ok(changed > 0)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM presence_keys WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn subscribe_expired(&self) -> broadcast::Receiver<String> {
        self.expired_tx.subscribe()
    }
}

/// Background task that sweeps expired keys on an interval.
pub async fn run_sweeper(store: Arc<SqliteTtlStore>, interval: Duration) {
    let mut interval = tokio::time::interval(interval);

    loop {
        interval.tick().await;

        match store.sweep() {
            Ok(count) => {
                if count > 0 {
                    debug!("Presence sweep: expired {} keys", count);
                }
            }
            Err(e) => {
                warn!("Presence sweep error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteTtlStore {
        SqliteTtlStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn value_is_readable_until_deleted() {
        let store = store();
        store.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_key_cannot_be_refreshed() {
        let store = store();
        store.set("k", "v", Duration::ZERO).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(!store.expire("k", Duration::from_secs(60)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sweep_announces_expired_keys() {
        let store = store();
        let mut expired = store.subscribe_expired();
        store.set("gone", "1", Duration::ZERO).await.unwrap();
        store.set("kept", "2", Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.sweep().unwrap(), 1);
        assert_eq!(expired.recv().await.unwrap(), "gone");
        assert_eq!(store.get("kept").await.unwrap().as_deref(), Some("2"));
    }
}

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

use murmur_db::map_sql_error;
use murmur_types::{Error, Result};

use crate::{Acker, Delivery, Publisher, Subscriber, topic_matches};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long a claimed message stays with its consumer before any consumer
/// sharing the store may take it again.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);

/// Durable topic broker stored in a SQLite file.
///
/// A published message becomes one row per bound queue. Rows move
/// `ready` → `unacked` when handed to a consumer, are deleted on ack,
/// go back to `ready` on a requeueing nack and to `dead` otherwise.
/// An `unacked` row whose lease ran out is claimable again, so messages
/// held by a process that died are redelivered without disturbing the
/// ones other live processes are still handling.
#[derive(Clone)]
pub struct SqliteBroker {
    inner: Arc<Inner>,
}

struct Inner {
    conn: Mutex<Connection>,
    published: Notify,
    lease: Duration,
}

impl SqliteBroker {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Self::open_with_lease(path, DEFAULT_LEASE)
    }

    pub fn open_with_lease(path: &Path, lease: Duration) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let broker = Self::init(conn, lease)?;
        info!("Broker store opened at {} (lease {:?})", path.display(), lease);
        Ok(broker)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::init(Connection::open_in_memory()?, DEFAULT_LEASE)
    }

    fn init(conn: Connection, lease: Duration) -> anyhow::Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS exchanges (
                name        TEXT PRIMARY KEY,
                kind        TEXT NOT NULL DEFAULT 'topic'
            );

            CREATE TABLE IF NOT EXISTS queues (
                name        TEXT PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS bindings (
                exchange    TEXT NOT NULL,
                queue       TEXT NOT NULL,
                pattern     TEXT NOT NULL,
                PRIMARY KEY (exchange, queue, pattern)
            );

            CREATE TABLE IF NOT EXISTS broker_messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                queue           TEXT NOT NULL,
                exchange        TEXT NOT NULL,
                routing_key     TEXT NOT NULL,
                content_type    TEXT NOT NULL,
                body            BLOB NOT NULL,
                state           TEXT NOT NULL DEFAULT 'ready',
                redelivered     INTEGER NOT NULL DEFAULT 0,
                claimed_at      INTEGER,
                published_at    TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_broker_messages_queue
                ON broker_messages(queue, state, id);
            ",
        )?;

        // Stores written before leases existed
        let has_claimed_at: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('broker_messages') WHERE name = 'claimed_at'",
            [],
            |row| row.get(0),
        )?;
        if !has_claimed_at {
            conn.execute("ALTER TABLE broker_messages ADD COLUMN claimed_at INTEGER", [])?;
        }

        let expired: i64 = conn.query_row(
            "SELECT COUNT(*) FROM broker_messages
             WHERE state = 'unacked' AND COALESCE(claimed_at, 0) <= ?1",
            params![lease_cutoff(lease)],
            |row| row.get(0),
        )?;
        if expired > 0 {
            info!("Broker: {} unacknowledged messages past their lease", expired);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                conn: Mutex::new(conn),
                published: Notify::new(),
                lease,
            }),
        })
    }

    pub fn declare_exchange(&self, name: &str) -> Result<()> {
        self.inner.with_conn(|conn| {
            conn.execute("INSERT OR IGNORE INTO exchanges (name) VALUES (?1)", params![name])?;
            Ok(())
        })
    }

    pub fn declare_queue(&self, name: &str) -> Result<()> {
        self.inner.with_conn(|conn| {
            conn.execute("INSERT OR IGNORE INTO queues (name) VALUES (?1)", params![name])?;
            Ok(())
        })
    }

    pub fn bind(&self, queue: &str, exchange: &str, pattern: &str) -> Result<()> {
        self.inner.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO bindings (exchange, queue, pattern) VALUES (?1, ?2, ?3)",
                params![exchange, queue, pattern],
            )?;
            Ok(())
        })
    }

    /// Messages waiting to be consumed.
    pub fn ready_count(&self, queue: &str) -> Result<usize> {
        self.count(queue, "ready")
    }

    /// Messages rejected without requeue.
    pub fn dead_count(&self, queue: &str) -> Result<usize> {
        self.count(queue, "dead")
    }

    fn count(&self, queue: &str, state: &str) -> Result<usize> {
        self.inner.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM broker_messages WHERE queue = ?1 AND state = ?2",
                params![queue, state],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|n| n as usize)
    }
}

impl Inner {
    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(format!("broker lock poisoned: {}", e)))?;
        f(&mut conn).map_err(map_sql_error)
    }

    /// Moves the oldest claimable message of `queue` to `unacked` and
    /// returns it. Claimable is `ready`, or `unacked` with an expired lease.
    fn claim(self: &Arc<Self>, queue: &str) -> Result<Option<Delivery>> {
        let cutoff = lease_cutoff(self.lease);
        let row = self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let row = tx
                .query_row(
                    "SELECT id, exchange, routing_key, content_type, body,
                            redelivered OR state = 'unacked'
                     FROM broker_messages
                     WHERE queue = ?1
                       AND (state = 'ready'
                            OR (state = 'unacked' AND COALESCE(claimed_at, 0) <= ?2))
                     ORDER BY id
                     LIMIT 1",
                    params![queue, cutoff],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, Vec<u8>>(4)?,
                            row.get::<_, bool>(5)?,
                        ))
                    },
                )
                .optional()?;
            if let Some((id, .., redelivered)) = &row {
                tx.execute(
                    "UPDATE broker_messages SET state = 'unacked', redelivered = ?2, claimed_at = ?3
                     WHERE id = ?1",
                    params![id, redelivered, Utc::now().timestamp_millis()],
                )?;
            }
            tx.commit()?;
            Ok(row)
        })?;

        Ok(row.map(|(tag, exchange, routing_key, content_type, body, redelivered)| {
            let acker: Arc<dyn Acker> = self.clone();
            let mut delivery = Delivery::new(tag, exchange, routing_key, body, acker);
            delivery.content_type = content_type;
            delivery.redelivered = redelivered;
            delivery
        }))
    }
}

/// Claims taken at or before this instant (epoch millis) have expired.
fn lease_cutoff(lease: Duration) -> i64 {
    let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
    Utc::now().timestamp_millis().saturating_sub(lease_ms)
}

#[async_trait]
impl Acker for Inner {
    async fn ack(&self, tag: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM broker_messages WHERE id = ?1 AND state = 'unacked'",
                params![tag],
            )?;
            Ok(())
        })
    }

    async fn nack(&self, tag: i64, requeue: bool) -> Result<()> {
        let state = if requeue { "ready" } else { "dead" };
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE broker_messages SET state = ?2, redelivered = 1, claimed_at = NULL
                 WHERE id = ?1 AND state = 'unacked'",
                params![tag, state],
            )?;
            Ok(())
        })?;
        if requeue {
            self.published.notify_waiters();
        }
        Ok(())
    }
}

#[async_trait]
impl Publisher for SqliteBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        let routed = self.inner.with_conn(|conn| {
            let tx = conn.transaction()?;
            let known: Option<String> = tx
                .query_row(
                    "SELECT name FROM exchanges WHERE name = ?1",
                    params![exchange],
                    |row| row.get(0),
                )
                .optional()?;
            if known.is_none() {
                return Ok(None);
            }

            let bindings = {
                let mut stmt =
                    tx.prepare("SELECT queue, pattern FROM bindings WHERE exchange = ?1")?;
                let rows = stmt.query_map(params![exchange], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };

            let mut queues: Vec<String> = bindings
                .into_iter()
                .filter(|(_, pattern)| topic_matches(pattern, routing_key))
                .map(|(queue, _)| queue)
                .collect();
            queues.sort();
            queues.dedup();

            let now = Utc::now();
            for queue in &queues {
                tx.execute(
                    "INSERT INTO broker_messages (queue, exchange, routing_key, content_type, body, published_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![queue, exchange, routing_key, content_type, body, now],
                )?;
            }
            tx.commit()?;
            Ok(Some(queues.len()))
        })?;

        match routed {
            None => Err(Error::not_found(format!("exchange '{}'", exchange))),
            Some(0) => {
                debug!("Broker: no queue bound for {} / {}", exchange, routing_key);
                Ok(())
            }
            Some(n) => {
                debug!("Broker: routed {} / {} to {} queue(s)", exchange, routing_key, n);
                self.inner.published.notify_waiters();
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Subscriber for SqliteBroker {
    async fn consume(&self, queue: &str) -> Result<mpsc::Receiver<Delivery>> {
        let known: Option<String> = self.inner.with_conn(|conn| {
            conn.query_row("SELECT name FROM queues WHERE name = ?1", params![queue], |row| {
                row.get(0)
            })
            .optional()
        })?;
        if known.is_none() {
            return Err(Error::not_found(format!("queue '{}'", queue)));
        }

        // Capacity 1: a message is claimed only once the consumer can take it
        let (tx, rx) = mpsc::channel(1);
        let inner = self.inner.clone();
        let queue = queue.to_string();

        tokio::spawn(async move {
            loop {
                let permit = match tx.reserve().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let notified = inner.published.notified();
                match inner.claim(&queue) {
                    Ok(Some(delivery)) => permit.send(delivery),
                    Ok(None) => {
                        drop(permit);
                        tokio::select! {
                            _ = notified => {}
                            _ = tokio::time::sleep(POLL_INTERVAL) => {}
                            _ = tx.closed() => break,
                        }
                    }
                    Err(e) => {
                        drop(permit);
                        warn!("Broker: claim on {} failed: {}", queue, e);
                        tokio::time::sleep(POLL_INTERVAL).await;
                    }
                }
            }
            debug!("Broker: consumer on {} stopped", queue);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{self, CHAT_CREATED_QUEUE, CHAT_EXCHANGE, MESSAGE_EXCHANGE, MESSAGE_SEND_QUEUE};

    fn broker() -> SqliteBroker {
        let broker = SqliteBroker::open_in_memory().unwrap();
        topology::declare(&broker).unwrap();
        broker
    }

    #[tokio::test]
    async fn publish_routes_by_key() {
        let broker = broker();
        broker
            .publish(MESSAGE_EXCHANGE, "message.send", b"{}".to_vec(), "application/json")
            .await
            .unwrap();
        assert_eq!(broker.ready_count(MESSAGE_SEND_QUEUE).unwrap(), 1);
        assert_eq!(broker.ready_count("message_send_encrypted").unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_exchange_is_an_error() {
        let broker = broker();
        let err = broker
            .publish("nope", "x", Vec::new(), "application/json")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn ack_removes_and_nack_requeues() {
        let broker = broker();
        broker
            .publish(CHAT_EXCHANGE, "chat.created", b"1".to_vec(), "application/json")
            .await
            .unwrap();

        let mut rx = broker.consume(CHAT_CREATED_QUEUE).await.unwrap();
        let first = rx.recv().await.unwrap();
        assert!(!first.redelivered);
        first.nack(true).await.unwrap();

        let again = rx.recv().await.unwrap();
        assert_eq!(again.tag, first.tag);
        assert!(again.redelivered);
        again.ack().await.unwrap();

        assert_eq!(broker.ready_count(CHAT_CREATED_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn nack_without_requeue_dead_letters() {
        let broker = broker();
        broker
            .publish(CHAT_EXCHANGE, "chat.created", b"bad".to_vec(), "application/json")
            .await
            .unwrap();

        let mut rx = broker.consume(CHAT_CREATED_QUEUE).await.unwrap();
        rx.recv().await.unwrap().nack(false).await.unwrap();
        assert_eq!(broker.dead_count(CHAT_CREATED_QUEUE).unwrap(), 1);
        assert_eq!(broker.ready_count(CHAT_CREATED_QUEUE).unwrap(), 0);
    }

    #[tokio::test]
    async fn consumer_wakes_on_publish() {
        let broker = broker();
        let mut rx = broker.consume(MESSAGE_SEND_QUEUE).await.unwrap();

        broker
            .publish(MESSAGE_EXCHANGE, "message.send", b"late".to_vec(), "application/json")
            .await
            .unwrap();
        let delivery = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.body, b"late");
    }

    fn store_path(name: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("murmur-broker-{}-{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("broker.db");
        let _ = std::fs::remove_file(&path);
        (dir, path)
    }

    #[tokio::test]
    async fn expired_claims_are_redelivered_after_reopen() {
        let (dir, path) = store_path("expired");

        {
            let broker = SqliteBroker::open(&path).unwrap();
            topology::declare(&broker).unwrap();
            broker
                .publish(CHAT_EXCHANGE, "chat.created", b"x".to_vec(), "application/json")
                .await
                .unwrap();
            // claimed but never settled, as if the process died mid-handling
            let held = broker.inner.claim(CHAT_CREATED_QUEUE).unwrap().unwrap();
            assert_eq!(held.body, b"x");
            assert_eq!(broker.ready_count(CHAT_CREATED_QUEUE).unwrap(), 0);
        }

        let reopened = SqliteBroker::open_with_lease(&path, Duration::ZERO).unwrap();
        let again = reopened.inner.claim(CHAT_CREATED_QUEUE).unwrap().unwrap();
        assert_eq!(again.body, b"x");
        assert!(again.redelivered);
        again.ack().await.unwrap();
        assert!(reopened.inner.claim(CHAT_CREATED_QUEUE).unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn second_process_leaves_live_claims_alone() {
        let (dir, path) = store_path("shared");

        let first = SqliteBroker::open(&path).unwrap();
        topology::declare(&first).unwrap();
        for body in [b"a", b"b"] {
            first
                .publish(CHAT_EXCHANGE, "chat.created", body.to_vec(), "application/json")
                .await
                .unwrap();
        }
        let held = first.inner.claim(CHAT_CREATED_QUEUE).unwrap().unwrap();
        assert_eq!(held.body, b"a");

        let second = SqliteBroker::open(&path).unwrap();
        let next = second.inner.claim(CHAT_CREATED_QUEUE).unwrap().unwrap();
        assert_eq!(next.body, b"b");
        assert!(!next.redelivered);
        assert!(second.inner.claim(CHAT_CREATED_QUEUE).unwrap().is_none());

        held.ack().await.unwrap();
        next.ack().await.unwrap();
        assert_eq!(first.ready_count(CHAT_CREATED_QUEUE).unwrap(), 0);
        drop((first, second));
        let _ = std::fs::remove_dir_all(&dir);
    }
}

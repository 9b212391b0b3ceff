use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use murmur_types::events::ServerEvent;
use murmur_types::{Error, Result};

use crate::ttl::TtlStore;

pub const USER_SOCKETS_PREFIX: &str = "user_sockets:";
pub const ACTIVE_SOCKETS_PREFIX: &str = "active_sockets:";

const SOCKET_ID_LEN: usize = 16;

/// Sending side of one live WebSocket.
#[derive(Clone)]
pub struct ConnHandle {
    tx: mpsc::UnboundedSender<String>,
    closed: CancellationToken,
}

impl ConnHandle {
    /// A handle plus the receiver the socket task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    pub fn push(&self, event: &ServerEvent) -> Result<()> {
        if self.is_closed() {
            return Err(Error::internal("connection closed"));
        }
        let text = serde_json::to_string(event).map_err(Error::internal)?;
        self.tx
            .send(text)
            .map_err(|_| Error::internal("connection closed"))
    }

    /// Asks the socket task to send a Close frame and stop.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

struct Entry {
    user_id: String,
    handle: ConnHandle,
}

/// Which user holds a live connection on this process.
///
/// Sockets live in a local map; the user↔socket mapping is mirrored into a
/// TTL store that is the source of truth for liveness. When a socket key
/// expires the local connection is closed even if the client never said goodbye.
pub struct PresenceRegistry {
    store: Arc<dyn TtlStore>,
    ttl: Duration,
    sockets: RwLock<HashMap<String, Entry>>,
}

fn user_key(user_id: &str) -> String {
    format!("{USER_SOCKETS_PREFIX}{user_id}")
}

fn socket_key(socket_id: &str) -> String {
    format!("{ACTIVE_SOCKETS_PREFIX}{socket_id}")
}

fn new_socket_id() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SOCKET_ID_LEN)
        .map(char::from)
        .collect()
}

impl PresenceRegistry {
    /// Builds the registry and starts its expiry listener.
    pub fn new(store: Arc<dyn TtlStore>, ttl: Duration) -> Arc<Self> {
        let expired = store.subscribe_expired();
        let registry = Arc::new(Self {
            store,
            ttl,
            sockets: RwLock::new(HashMap::new()),
        });
        tokio::spawn(listen_for_expiry(Arc::downgrade(&registry), expired));
        registry
    }

    pub async fn register(&self, user_id: &str, handle: ConnHandle) -> Result<String> {
        let socket_id = new_socket_id();
        self.sockets.write().await.insert(
            socket_id.clone(),
            Entry {
                user_id: user_id.to_string(),
                handle,
            },
        );

        if let Err(e) = self.publish(user_id, &socket_id).await {
            warn!("Presence of {} not stored, dropping socket {}: {}", user_id, socket_id, e);
            self.remove_if_current(user_id, &socket_id).await;
            return Err(e);
        }

        info!("{} online on socket {}", user_id, socket_id);
        Ok(socket_id)
    }

    async fn publish(&self, user_id: &str, socket_id: &str) -> Result<()> {
        self.store.set(&user_key(user_id), socket_id, self.ttl).await?;
        self.store.set(&socket_key(socket_id), user_id, self.ttl).await
    }

    /// The user's live connection on this process, if any.
    pub async fn lookup(&self, user_id: &str) -> Result<Option<ConnHandle>> {
        let Some(socket_id) = self.store.get(&user_key(user_id)).await? else {
            return Ok(None);
        };
        let sockets = self.sockets.read().await;
        Ok(sockets
            .get(&socket_id)
            .map(|entry| entry.handle.clone())
            .filter(|handle| !handle.is_closed()))
    }

    /// Extends both keys. Keys that already expired stay expired.
    pub async fn refresh(&self, user_id: &str) -> Result<()> {
        let Some(socket_id) = self.store.get(&user_key(user_id)).await? else {
            return Ok(());
        };
        self.store.expire(&user_key(user_id), self.ttl).await?;
        self.store.expire(&socket_key(&socket_id), self.ttl).await?;
        Ok(())
    }

    pub async fn remove(&self, user_id: &str) {
        let socket_id = match self.store.get(&user_key(user_id)).await {
            Ok(socket_id) => socket_id,
            Err(e) => {
                warn!("Presence lookup for {} failed: {}", user_id, e);
                None
            }
        };

        if let Err(e) = self.store.delete(&user_key(user_id)).await {
            warn!("Failed to delete presence of {}: {}", user_id, e);
        }
        if let Some(socket_id) = socket_id {
            if let Err(e) = self.store.delete(&socket_key(&socket_id)).await {
                warn!("Failed to delete socket {}: {}", socket_id, e);
            }
            self.evict(&socket_id).await;
        }
    }

    /// Disconnect path: drops `socket_id`, and the user's presence only if
    /// that socket still owns it. Returns whether it did.
    pub async fn remove_if_current(&self, user_id: &str, socket_id: &str) -> bool {
        let current = match self.store.get(&user_key(user_id)).await {
            Ok(current) => current.as_deref() == Some(socket_id),
            Err(e) => {
                warn!("Presence lookup for {} failed: {}", user_id, e);
                false
            }
        };

        if current {
            if let Err(e) = self.store.delete(&user_key(user_id)).await {
                warn!("Failed to delete presence of {}: {}", user_id, e);
            }
        }
        if let Err(e) = self.store.delete(&socket_key(socket_id)).await {
            warn!("Failed to delete socket {}: {}", socket_id, e);
        }
        self.evict(socket_id).await;
        current
    }

    async fn evict(&self, socket_id: &str) {
        if let Some(entry) = self.sockets.write().await.remove(socket_id) {
            entry.handle.close();
            debug!("Evicted socket {} of {}", socket_id, entry.user_id);
        }
    }

    /// Sockets held by this process.
    pub async fn local_count(&self) -> usize {
        self.sockets.read().await.len()
    }
}

async fn listen_for_expiry(registry: Weak<PresenceRegistry>, mut expired: broadcast::Receiver<String>) {
    loop {
        let key = match expired.recv().await {
            Ok(key) => key,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Presence expiry listener lagged by {} keys", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let Some(socket_id) = key.strip_prefix(ACTIVE_SOCKETS_PREFIX) else {
            continue;
        };
        let Some(registry) = registry.upgrade() else {
            break;
        };
        info!("Socket {} expired, closing", socket_id);
        registry.evict(socket_id).await;
    }
}

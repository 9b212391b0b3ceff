//! Structured fan-out/fan-in over a [`JoinSet`].
//!
//! Every branch of a group races its work against a shared
//! [`CancellationToken`]. The first fatal error cancels the token, so
//! siblings (and any nested groups built on the same token) stop at their
//! next await point. Writes a branch already finished are left in place.

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use murmur_types::{Error, Result};

pub struct TaskGroup<T> {
    set: JoinSet<(usize, Result<T>)>,
    token: CancellationToken,
    spawned: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A group whose branches share `token` with an enclosing operation.
    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            set: JoinSet::new(),
            token,
            spawned: 0,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn spawn<F>(&mut self, branch: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.spawned;
        self.spawned += 1;

        let token = self.token.clone();
        self.set.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                r = branch => r,
            };
            if let Err(e) = &result {
                if !matches!(e, Error::Cancelled) && !e.spares_siblings() {
                    token.cancel();
                }
            }
            (index, result)
        });
    }

    /// Waits for every branch. Results come back in spawn order.
    /// Fails with the first real error seen; `Cancelled` is returned only
    /// when nothing else went wrong, i.e. the token was cancelled from outside.
    pub async fn join(mut self) -> Result<Vec<T>> {
        let mut slots: Vec<Option<T>> = (0..self.spawned).map(|_| None).collect();
        let mut first_error: Option<Error> = None;
        let mut cancelled = false;

        while let Some(joined) = self.set.join_next().await {
            match joined {
                Ok((index, Ok(value))) => slots[index] = Some(value),
                Ok((_, Err(Error::Cancelled))) => cancelled = true,
                Ok((_, Err(e))) => {
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    warn!("Fan-out branch aborted: {}", e);
                    self.token.cancel();
                    first_error.get_or_insert(Error::internal(format!("branch aborted: {}", e)));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancelled {
            return Err(Error::Cancelled);
        }
        Ok(slots.into_iter().flatten().collect())
    }
}

impl<T: Send + 'static> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

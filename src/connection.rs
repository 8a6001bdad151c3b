//! Shared connection guard.
//!
//! A [`ConnectionCache`] holds at most one live handle and at most one
//! in-flight connection attempt. Concurrent callers that arrive while an
//! attempt is running all await that same attempt. A failed attempt is
//! reported to each of its waiters and then forgotten, so the next call
//! starts over.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Failed(String),
}

/// Establishes and tears down handles to the persistence backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    async fn connect(&self) -> Result<Self::Handle, ConnectionError>;

    async fn disconnect(&self, _handle: Self::Handle) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Connecting,
    Connected,
}

type Attempt<H> = Shared<BoxFuture<'static, Result<H, ConnectionError>>>;

enum Slot<H> {
    Uninitialized,
    Connecting { id: u64, attempt: Attempt<H> },
    Connected(H),
}

pub struct ConnectionCache<C: Connector> {
    connector: Arc<C>,
    timeout: Duration,
    slot: Arc<Mutex<Slot<C::Handle>>>,
    attempts: AtomicU64,
}

impl<C: Connector> ConnectionCache<C> {
    pub fn new(connector: C, timeout: Duration) -> Self {
        Self {
            connector: Arc::new(connector),
            timeout,
            slot: Arc::new(Mutex::new(Slot::Uninitialized)),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn state(&self) -> ConnectionState {
        match &*lock(&self.slot) {
            Slot::Uninitialized => ConnectionState::Uninitialized,
            Slot::Connecting { .. } => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
        }
    }

    /// Return the cached handle, joining or starting the single connection
    /// attempt when there is none yet.
    pub async fn acquire(&self) -> Result<C::Handle, ConnectionError> {
        let attempt = {
            let mut slot = lock(&self.slot);
            match &*slot {
                Slot::Connected(handle) => return Ok(handle.clone()),
                Slot::Connecting { attempt, .. } => attempt.clone(),
                Slot::Uninitialized => {
                    let id = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
                    let attempt = self.start_attempt(id);
                    *slot = Slot::Connecting {
                        id,
                        attempt: attempt.clone(),
                    };
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Tear down the cached handle and return to `Uninitialized`.
    ///
    /// An attempt still in flight is abandoned: its waiters receive its
    /// result, but the handle is not cached.
    pub async fn release(&self) -> Result<(), ConnectionError> {
        let previous = std::mem::replace(&mut *lock(&self.slot), Slot::Uninitialized);
        match previous {
            Slot::Connected(handle) => {
                self.connector.disconnect(handle).await?;
                info!("connection released");
            }
            Slot::Connecting { id, .. } => {
                debug!(attempt = id, "abandoning in-flight connection attempt");
            }
            Slot::Uninitialized => {}
        }
        Ok(())
    }

    // The attempt runs as its own task so it completes even when every
    // waiter has gone away.
    fn start_attempt(&self, id: u64) -> Attempt<C::Handle> {
        let connector = Arc::clone(&self.connector);
        let slot = Arc::clone(&self.slot);
        let timeout = self.timeout;

        debug!(attempt = id, ?timeout, "starting connection attempt");
        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result,
                Err(_) => Err(ConnectionError::Timeout(timeout)),
            };
            if !settle(&slot, id, &outcome) {
                // Released while connecting; nobody owns this handle now.
                if let Ok(handle) = &outcome {
                    if let Err(err) = connector.disconnect(handle.clone()).await {
                        warn!(attempt = id, error = %err, "failed to close superseded connection");
                    }
                }
            }
            outcome
        });

        async move {
            task.await.unwrap_or_else(|err| {
                Err(ConnectionError::Failed(format!(
                    "connection task aborted: {err}"
                )))
            })
        }
        .boxed()
        .shared()
    }
}

/// Store the outcome of attempt `id` if it is still the active one.
/// Returns `false` when the attempt was superseded by a `release`.
fn settle<H: Clone>(slot: &Mutex<Slot<H>>, id: u64, outcome: &Result<H, ConnectionError>) -> bool {
    let mut guard = lock(slot);
    let current = matches!(&*guard, Slot::Connecting { id: active, .. } if *active == id);
    if !current {
        debug!(attempt = id, "connection attempt superseded, result not cached");
        return false;
    }

    *guard = match outcome {
        Ok(handle) => {
            info!(attempt = id, "connection established");
            Slot::Connected(handle.clone())
        }
        Err(err) => {
            warn!(attempt = id, error = %err, "connection attempt failed");
            Slot::Uninitialized
        }
    };
    true
}

fn lock<H>(slot: &Mutex<Slot<H>>) -> MutexGuard<'_, Slot<H>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

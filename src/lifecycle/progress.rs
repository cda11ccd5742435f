//! Progress bus
//!
//! Fan-out of [`ProgressEvent`]s to registered observers. Delivery is
//! synchronous and in registration order. A failing or panicking observer is
//! logged and skipped; it never affects other observers or the publisher.
//! Nothing is buffered: late subscribers miss earlier events.

use crate::types::ProgressEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;
use tokio::sync::mpsc;

/// Why an observer could not handle an event
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The observer is gone and should be removed
    #[error("listener closed")]
    Closed,
    #[error("listener failed: {0}")]
    Failed(String),
}

type Listener = Arc<dyn Fn(&ProgressEvent) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|(lid, _)| *lid != id);
        }
    }
}

/// Fan-out notification channel for lifecycle events
#[derive(Clone, Default)]
pub struct ProgressBus {
    registry: Arc<Registry>,
}

/// Capability to remove a listener from the bus
#[must_use = "dropping a Subscription keeps the listener registered; call unsubscribe() to remove it"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ProgressEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        match self.registry.listeners.lock() {
            Ok(mut listeners) => listeners.push((id, Arc::new(listener))),
            Err(e) => tracing::warn!("Progress bus registry poisoned: {}", e),
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Register a channel-backed observer and return its receiving end
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event| {
            tx.send(event.clone()).map_err(|_| ListenerError::Closed)
        });
        (subscription, rx)
    }

    /// Deliver `event` to every registered observer
    pub fn publish(&self, event: &ProgressEvent) {
        // Snapshot so listeners may (un)subscribe without deadlocking
        let snapshot: Vec<(u64, Listener)> = match self.registry.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(e) => {
                tracing::warn!("Progress bus registry poisoned: {}", e);
                return;
            }
        };

        let mut closed = Vec::new();
        for (id, listener) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(ListenerError::Closed)) => closed.push(id),
                Ok(Err(e)) => tracing::warn!("Progress listener {} failed: {}", id, e),
                Err(_) => tracing::warn!("Progress listener {} panicked", id),
            }
        }

        for id in closed {
            tracing::debug!("Removing closed progress listener {}", id);
            self.registry.remove(id);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry
            .listeners
            .lock()
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }
}

//! Non-blocking fan-out of safety updates to subscribers.

use crate::StorageError;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, Weak},
};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

#[derive(Debug)]
struct Registry<T> {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<T>>,
}

/// A set of bounded channels that receive every published value.
///
/// Publishing never waits: a value is dropped for a subscriber whose channel is full, and a
/// subscriber whose receiver is gone is removed.
#[derive(Debug)]
pub struct Feed<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self { registry: Arc::new(Mutex::new(Registry { next_id: 0, senders: HashMap::new() })) }
    }
}

impl<T: Clone + fmt::Debug> Feed<T> {
    /// Creates a feed without subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `sender`; it receives values until the returned [`Subscription`] is released.
    pub fn subscribe(&self, sender: mpsc::Sender<T>) -> Result<Subscription<T>, StorageError> {
        let mut registry = self.registry.lock().map_err(|_| StorageError::LockPoisoned)?;
        let id = registry.next_id;
        registry.next_id += 1;
        registry.senders.insert(id, sender);
        Ok(Subscription { id, registry: Arc::downgrade(&self.registry) })
    }

    /// Offers `value` to every subscriber and returns how many accepted it.
    pub fn send(&self, value: T) -> Result<usize, StorageError> {
        let mut registry = self.registry.lock().map_err(|_| StorageError::LockPoisoned)?;
        let mut delivered = 0;
        registry.senders.retain(|id, sender| match sender.try_send(value.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(dropped)) => {
                debug!(
                    target: "supervisor::storage",
                    subscription = id,
                    value = ?dropped,
                    "Subscriber is lagging, dropping update"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                trace!(
                    target: "supervisor::storage",
                    subscription = id,
                    "Removing closed subscriber"
                );
                false
            }
        });
        Ok(delivered)
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().map(|registry| registry.senders.len()).unwrap_or_default()
    }

    /// Poisons the registry lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self)
    where
        T: Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        let result = std::thread::spawn(move || {
            let _guard = registry.lock();
            panic!("feed registry poisoned");
        })
        .join();
        assert!(result.is_err());
    }
}

/// Handle of one registered subscriber.
///
/// Dropping the handle unsubscribes.
#[must_use = "dropping the subscription unsubscribes"]
#[derive(Debug)]
pub struct Subscription<T> {
    id: u64,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Subscription<T> {
    /// Stops delivery to this subscriber.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn release(&self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.senders.remove(&self.id);
            }
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}

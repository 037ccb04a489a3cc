//! Lock-protected containers shared between the supervisor's tasks.

use crate::StorageError;
use std::{
    collections::HashMap,
    hash::Hash,
    sync::{
        RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// A map behind a reader-writer lock.
///
/// Values are cloned out, so the lock is never held while the caller uses them. Store handles are
/// kept as `Arc`s for that reason.
#[derive(Debug)]
pub struct RwMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for RwMap<K, V> {
    fn default() -> Self {
        Self { inner: RwLock::new(HashMap::new()) }
    }
}

impl<K, V> RwMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &K) -> Result<Option<V>, StorageError> {
        let guard = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(guard.get(key).cloned())
    }

    /// Stores `value` under `key`, returning the value it replaced.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, StorageError> {
        let mut guard = self.inner.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(guard.insert(key, value))
    }

    /// Returns a snapshot of all entries.
    pub fn entries(&self) -> Result<Vec<(K, V)>, StorageError> {
        let guard = self.inner.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(guard.iter().map(|(key, value)| (key.clone(), value.clone())).collect())
    }
}

/// A single value behind a reader-writer lock, with a write counter.
#[derive(Debug, Default)]
pub struct RwValue<T> {
    value: RwLock<T>,
    version: AtomicU64,
}

impl<T: Clone> RwValue<T> {
    /// Creates a value at version zero.
    pub fn new(value: T) -> Self {
        Self { value: RwLock::new(value), version: AtomicU64::new(0) }
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> Result<T, StorageError> {
        let guard = self.value.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(guard.clone())
    }

    /// Replaces the value and bumps the version.
    pub fn set(&self, value: T) -> Result<(), StorageError> {
        let mut guard = self.value.write().map_err(|_| StorageError::LockPoisoned)?;
        *guard = value;
        self.version.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Runs `f` on the value under the write lock.
    ///
    /// The version is bumped only if `f` succeeds and changed the value.
    pub fn update<R, E>(&self, f: impl FnOnce(&mut T) -> Result<R, E>) -> Result<R, E>
    where
        T: PartialEq,
        E: From<StorageError>,
    {
        let mut guard = self.value.write().map_err(|_| StorageError::LockPoisoned)?;
        let before = guard.clone();
        let result = f(&mut guard)?;
        if *guard != before {
            self.version.fetch_add(1, Ordering::AcqRel);
        }
        Ok(result)
    }

    /// Number of writes so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

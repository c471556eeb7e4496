//! In-process write serialization for recomputation.
//!
//! SQLite transactions keep each write atomic; these locks keep two triggers
//! for the same key from interleaving their read and write phases.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::models::month::Month;

/// One mutex per key, created on first use.
#[derive(Debug)]
pub struct KeyedMutex<K> {
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedMutex<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

/// Drops the map entry once the caller holds the last outside reference, so
/// keys that are no longer in use do not pile up.
fn release_slot<K: Eq + Hash, S>(slots: &Mutex<HashMap<K, Arc<S>>>, key: &K, slot: Arc<S>) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    let idle = slots
        .get(key)
        .is_some_and(|current| Arc::ptr_eq(current, &slot) && Arc::strong_count(&slot) == 2);
    if idle {
        slots.remove(key);
    }
}

impl<K: Eq + Hash + Clone> KeyedMutex<K> {
    pub fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Runs `callback` while holding the lock for `key`.
    pub fn with_lock<T>(&self, key: &K, callback: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let value = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            callback()
        };
        release_slot(&self.slots, key, slot);
        value
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// One reader/writer gate per key.
#[derive(Debug)]
pub struct KeyedGate<K> {
    slots: Mutex<HashMap<K, Arc<RwLock<()>>>>,
}

impl<K> Default for KeyedGate<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedGate<K> {
    fn slot(&self, key: &K) -> Arc<RwLock<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    pub fn shared<T>(&self, key: &K, callback: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let value = {
            let _guard = slot.read().unwrap_or_else(PoisonError::into_inner);
            callback()
        };
        release_slot(&self.slots, key, slot);
        value
    }

    pub fn exclusive<T>(&self, key: &K, callback: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let value = {
            let _guard = slot.write().unwrap_or_else(PoisonError::into_inner);
            callback()
        };
        release_slot(&self.slots, key, slot);
        value
    }

    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Locks shared by every service of one engine instance.
///
/// Lock order is always month gate, then score key. Task locks are never held
/// together with the other two.
#[derive(Debug, Default)]
pub struct EngineLocks {
    pub tasks: KeyedMutex<String>,
    pub scores: KeyedMutex<(String, Month)>,
    pub months: KeyedGate<Month>,
}

impl EngineLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

//! Shared machinery of the single-lock backends.
//!
//! Both [`SimpleHashMapBackend`](super::SimpleHashMapBackend) and
//! [`MultiConditionHashMapBackend`](super::MultiConditionHashMapBackend) keep
//! one map behind one reader-writer lock and differ only in how `get_when`
//! waiters are tracked and woken. That difference is the [`Triggers`] trait.
//!
//! # Locking
//!
//! ```text
//! get / multi_get    map.read()
//! put / multi_put    triggers.lock() -> (wait while pending) -> map.write() -> summon
//! get_when           triggers.lock() -> map.read() -> (wait on ticket condition)
//! ```
//!
//! Writers and waiters always take `triggers` before `map`, and writers only
//! touch the map while holding `triggers`, so a waiter that holds `triggers`
//! sees a map that cannot change under it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, MutexGuard, PoisonError};

use super::{lock, read, write, Key, Value};

/// Bookkeeping for `get_when` waiters, protected by the backend's trigger
/// mutex.
pub(super) trait Triggers: Default + Send {
    /// Handle a waiter keeps between registration and removal.
    type Ticket;

    /// Whether some waiter still has to acknowledge the last write.
    fn pending(&self) -> bool;

    /// Marks the waiters interested in `keys` as unsignalled and wakes them.
    fn summon<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>);

    /// Registers a waiter for `key_cond`.
    fn register(&mut self, key_cond: &str) -> Self::Ticket;

    /// The condition the ticket's waiter sleeps on.
    fn condition(ticket: &Self::Ticket) -> Arc<Condvar>;

    /// Records that the waiter woke up. Returns `true` if it was the last
    /// unsignalled waiter, in which case blocked writers must be released.
    fn acknowledge(&mut self, ticket: &mut Self::Ticket) -> bool;

    /// Removes a waiter whose condition holds.
    fn unregister(&mut self, key_cond: &str, ticket: Self::Ticket);
}

/// A hash map behind one reader-writer lock with `get_when` support.
#[derive(Debug)]
pub(super) struct SingleLockBackend<T> {
    map: std::sync::RwLock<HashMap<Key, Value>>,
    triggers: std::sync::Mutex<T>,
    triggers_done: Condvar,
}

impl<T: Triggers> SingleLockBackend<T> {
    pub(super) fn new() -> Self {
        Self {
            map: std::sync::RwLock::new(HashMap::new()),
            triggers: std::sync::Mutex::new(T::default()),
            triggers_done: Condvar::new(),
        }
    }

    /// Takes the trigger lock once no waiter is still processing a write.
    fn quiescent_triggers(&self) -> MutexGuard<'_, T> {
        let mut triggers = lock(&self.triggers);
        while triggers.pending() {
            triggers = self
                .triggers_done
                .wait(triggers)
                .unwrap_or_else(PoisonError::into_inner);
        }
        triggers
    }

    pub(super) fn put(&self, key: &str, value: &[u8]) {
        let mut triggers = self.quiescent_triggers();
        write(&self.map).insert(key.to_owned(), value.to_vec());
        triggers.summon(std::iter::once(key));
    }

    pub(super) fn get(&self, key: &str) -> Option<Value> {
        read(&self.map).get(key).cloned()
    }

    pub(super) fn multi_put(&self, pairs: &HashMap<Key, Value>) {
        let mut triggers = self.quiescent_triggers();
        {
            let mut map = write(&self.map);
            for (key, value) in pairs {
                map.insert(key.clone(), value.clone());
            }
        }
        triggers.summon(pairs.keys().map(String::as_str));
    }

    pub(super) fn multi_get(&self, keys: &HashSet<Key>) -> HashMap<Key, Value> {
        let map = read(&self.map);
        keys.iter()
            .filter_map(|key| map.get(key).map(|value| (key.clone(), value.clone())))
            .collect()
    }

    pub(super) fn get_when(&self, key: &str, key_cond: &str, value_cond: &[u8]) -> Option<Value> {
        let mut triggers = lock(&self.triggers);
        let mut ticket = triggers.register(key_cond);
        let changed = T::condition(&ticket);

        while !self.condition_holds(key_cond, value_cond) {
            triggers = changed
                .wait(triggers)
                .unwrap_or_else(PoisonError::into_inner);
            if triggers.acknowledge(&mut ticket) {
                self.triggers_done.notify_all();
            }
        }

        triggers.unregister(key_cond, ticket);
        let value = read(&self.map).get(key).cloned();
        drop(triggers);
        value
    }

    fn condition_holds(&self, key_cond: &str, value_cond: &[u8]) -> bool {
        read(&self.map)
            .get(key_cond)
            .is_some_and(|value| value.as_slice() == value_cond)
    }

    /// Copy of the current contents.
    pub(super) fn snapshot(&self) -> HashMap<Key, Value> {
        read(&self.map).clone()
    }

    pub(super) fn len(&self) -> usize {
        read(&self.map).len()
    }
}

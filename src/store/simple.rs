//! Single map, single condition.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Condvar};

use super::triggers::{SingleLockBackend, Triggers};
use super::{Key, KeyValueDb, Value};
use crate::error::DbError;

/// Hash map backend where every write wakes every `get_when` waiter.
///
/// Cheap when there are few waiters; with many waiters on unrelated keys
/// each write stalls until all of them have re-checked their conditions.
#[derive(Debug)]
pub struct SimpleHashMapBackend {
    inner: SingleLockBackend<SharedCondition>,
}

impl SimpleHashMapBackend {
    /// Type name used in logs and reports.
    pub const NAME: &'static str = "SimpleHashMapBackend";

    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SingleLockBackend::new(),
        }
    }

    /// Copy of the current contents.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Key, Value> {
        self.inner.snapshot()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SimpleHashMapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SimpleHashMapBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} keys)", Self::NAME, self.len())
    }
}

impl KeyValueDb for SimpleHashMapBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError> {
        self.inner.put(key, value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, DbError> {
        Ok(self.inner.get(key))
    }

    fn multi_put(&self, pairs: &HashMap<Key, Value>) -> Result<(), DbError> {
        self.inner.multi_put(pairs);
        Ok(())
    }

    fn multi_get(&self, keys: &HashSet<Key>) -> Result<HashMap<Key, Value>, DbError> {
        Ok(self.inner.multi_get(keys))
    }

    fn get_when(
        &self,
        key: &str,
        key_cond: &str,
        value_cond: &[u8],
    ) -> Result<Option<Value>, DbError> {
        Ok(self.inner.get_when(key, key_cond, value_cond))
    }
}

/// One condition for all waiters.
///
/// Writes are numbered; a waiter that wakes up and sees a write number newer
/// than the one it last saw was signalled by that write. Spurious wake-ups
/// leave the number unchanged and are not counted.
#[derive(Debug)]
struct SharedCondition {
    changed: Arc<Condvar>,
    generation: u64,
    waiting: usize,
    unsignaled: usize,
}

impl Default for SharedCondition {
    fn default() -> Self {
        Self {
            changed: Arc::new(Condvar::new()),
            generation: 0,
            waiting: 0,
            unsignaled: 0,
        }
    }
}

#[derive(Debug)]
struct Ticket {
    changed: Arc<Condvar>,
    seen: u64,
}

impl Triggers for SharedCondition {
    type Ticket = Ticket;

    fn pending(&self) -> bool {
        self.unsignaled > 0
    }

    fn summon<'k>(&mut self, _keys: impl IntoIterator<Item = &'k str>) {
        if self.waiting > 0 {
            self.generation = self.generation.wrapping_add(1);
            self.unsignaled = self.waiting;
            self.changed.notify_all();
        }
    }

    fn register(&mut self, _key_cond: &str) -> Ticket {
        self.waiting += 1;
        Ticket {
            changed: Arc::clone(&self.changed),
            seen: self.generation,
        }
    }

    fn condition(ticket: &Ticket) -> Arc<Condvar> {
        Arc::clone(&ticket.changed)
    }

    fn acknowledge(&mut self, ticket: &mut Ticket) -> bool {
        if ticket.seen == self.generation {
            return false;
        }
        ticket.seen = self.generation;
        self.unsignaled = self.unsignaled.saturating_sub(1);
        self.unsignaled == 0
    }

    fn unregister(&mut self, _key_cond: &str, _ticket: Ticket) {
        self.waiting = self.waiting.saturating_sub(1);
    }
}

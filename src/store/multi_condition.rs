//! Single map, one condition per awaited key.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Condvar};

use super::triggers::{SingleLockBackend, Triggers};
use super::{Key, KeyValueDb, Value};
use crate::error::DbError;

/// Hash map backend where a write only wakes the `get_when` waiters whose
/// condition key it touched.
#[derive(Debug)]
pub struct MultiConditionHashMapBackend {
    inner: SingleLockBackend<PerKeyConditions>,
}

impl MultiConditionHashMapBackend {
    /// Type name used in logs and reports.
    pub const NAME: &'static str = "MultiConditionHashMapBackend";

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

impl Default for MultiConditionHashMapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MultiConditionHashMapBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({} keys)", Self::NAME, self.len())
    }
}

impl KeyValueDb for MultiConditionHashMapBackend {
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

/// Waiters on one condition key.
#[derive(Debug)]
struct KeyWaiters {
    changed: Arc<Condvar>,
    waiters: HashSet<u64>,
}

/// Waiters grouped by condition key. Each waiter has an id so that only the
/// waiters a write actually signalled need to acknowledge it.
#[derive(Debug, Default)]
struct PerKeyConditions {
    next_id: u64,
    keys: HashMap<Key, KeyWaiters>,
    unsignaled: HashSet<u64>,
}

#[derive(Debug)]
struct Ticket {
    id: u64,
    changed: Arc<Condvar>,
}

impl Triggers for PerKeyConditions {
    type Ticket = Ticket;

    fn pending(&self) -> bool {
        !self.unsignaled.is_empty()
    }

    fn summon<'k>(&mut self, keys: impl IntoIterator<Item = &'k str>) {
        for key in keys {
            if let Some(group) = self.keys.get(key) {
                self.unsignaled.extend(group.waiters.iter().copied());
                group.changed.notify_all();
            }
        }
    }

    fn register(&mut self, key_cond: &str) -> Ticket {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let group = self
            .keys
            .entry(key_cond.to_owned())
            .or_insert_with(|| KeyWaiters {
                changed: Arc::new(Condvar::new()),
                waiters: HashSet::new(),
            });
        group.waiters.insert(id);

        Ticket {
            id,
            changed: Arc::clone(&group.changed),
        }
    }

    fn condition(ticket: &Ticket) -> Arc<Condvar> {
        Arc::clone(&ticket.changed)
    }

    fn acknowledge(&mut self, ticket: &mut Ticket) -> bool {
        self.unsignaled.remove(&ticket.id) && self.unsignaled.is_empty()
    }

    fn unregister(&mut self, key_cond: &str, ticket: Ticket) {
        if let Some(group) = self.keys.get_mut(key_cond) {
            group.waiters.remove(&ticket.id);
            if group.waiters.is_empty() {
                self.keys.remove(key_cond);
            }
        }
    }
}

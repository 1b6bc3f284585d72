//! In-memory storage backends.
//!
//! Every backend implements [`KeyValueDb`], the same interface the network
//! client offers, so the benchmark harness and the command shell can drive a
//! local backend and a remote server interchangeably.
//!
//! # Backends
//!
//! | Backend | Locking | `get_when` wake-ups |
//! |---------|---------|---------------------|
//! | [`SimpleHashMapBackend`] | one reader-writer lock | every waiter, every write |
//! | [`MultiConditionHashMapBackend`] | one reader-writer lock | waiters on the written keys |
//! | [`ShardedHashMapBackend`] | one lock per shard | unsupported |
//!
//! # Write visibility for waiters
//!
//! The single-lock backends guarantee that every waiter woken by a write
//! re-checks its condition against that write before any further write is
//! applied. A burst of writes therefore cannot skip over the value a waiter
//! is looking for.

mod multi_condition;
mod sharded;
mod simple;
mod triggers;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use multi_condition::MultiConditionHashMapBackend;
pub use sharded::ShardedHashMapBackend;
pub use simple::SimpleHashMapBackend;

use crate::error::DbError;

/// Keys are UTF-8 strings.
pub type Key = String;

/// Values are opaque byte strings.
pub type Value = Vec<u8>;

/// A key-value database.
///
/// Implemented by the local backends and by
/// [`DatabaseClient`](crate::client::DatabaseClient).
pub trait KeyValueDb: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be completed.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError>;

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be completed.
    fn get(&self, key: &str) -> Result<Option<Value>, DbError>;

    /// Stores all `pairs` atomically with respect to other writers.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be completed.
    fn multi_put(&self, pairs: &HashMap<Key, Value>) -> Result<(), DbError>;

    /// Returns the values of the requested keys. Missing keys are omitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be completed.
    fn multi_get(&self, keys: &HashSet<Key>) -> Result<HashMap<Key, Value>, DbError>;

    /// Blocks until the value under `key_cond` equals `value_cond`, then
    /// returns the value under `key` as seen at that moment.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unsupported`] for backends without conditional
    /// reads, or an error if the request cannot be completed.
    fn get_when(&self, key: &str, key_cond: &str, value_cond: &[u8])
        -> Result<Option<Value>, DbError>;
}

/// Selects one of the local backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// [`SimpleHashMapBackend`].
    Simple,
    /// [`MultiConditionHashMapBackend`].
    MultiCondition,
    /// [`ShardedHashMapBackend`] with the given number of shards.
    Sharded {
        /// Number of shards, at least 1.
        shards: usize,
    },
}

impl BackendKind {
    /// Parses a backend name. Accepts the snake-case configuration names and
    /// the type names, case-insensitively. `shards` is only used by the
    /// sharded backend and must be non-zero there.
    #[must_use]
    pub fn from_name(name: &str, shards: usize) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "simple" | "simplehashmapbackend" => Some(Self::Simple),
            "multi_condition" | "multicondition" | "multiconditionhashmapbackend" => {
                Some(Self::MultiCondition)
            }
            "sharded" | "shardedhashmapbackend" if shards > 0 => Some(Self::Sharded { shards }),
            _ => None,
        }
    }

    /// Type name of the backend, used in logs and report file names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Simple => SimpleHashMapBackend::NAME,
            Self::MultiCondition => MultiConditionHashMapBackend::NAME,
            Self::Sharded { .. } => ShardedHashMapBackend::NAME,
        }
    }

    /// Whether the backend implements [`KeyValueDb::get_when`].
    #[must_use]
    pub const fn supports_get_when(self) -> bool {
        !matches!(self, Self::Sharded { .. })
    }

    /// Builds a new, empty backend.
    #[must_use]
    pub fn build(self) -> Arc<dyn KeyValueDb> {
        match self {
            Self::Simple => Arc::new(SimpleHashMapBackend::new()),
            Self::MultiCondition => Arc::new(MultiConditionHashMapBackend::new()),
            Self::Sharded { shards } => Arc::new(ShardedHashMapBackend::new(shards)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sharded { shards } => write!(f, "{}({shards})", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

// A panicking writer cannot leave a map half-updated (single `insert` calls
// or a loop of them under one guard), so poisoned locks are recovered.

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_parse() {
        assert_eq!(BackendKind::from_name("simple", 0), Some(BackendKind::Simple));
        assert_eq!(
            BackendKind::from_name("MultiConditionHashMapBackend", 0),
            Some(BackendKind::MultiCondition)
        );
        assert_eq!(
            BackendKind::from_name("sharded", 4),
            Some(BackendKind::Sharded { shards: 4 })
        );
        assert_eq!(BackendKind::from_name("sharded", 0), None);
        assert_eq!(BackendKind::from_name("lsm", 4), None);
    }

    #[test]
    fn backend_display() {
        assert_eq!(BackendKind::Simple.to_string(), "SimpleHashMapBackend");
        assert_eq!(
            BackendKind::Sharded { shards: 64 }.to_string(),
            "ShardedHashMapBackend(64)"
        );
    }

    #[test]
    fn built_backends_start_empty() {
        for kind in [
            BackendKind::Simple,
            BackendKind::MultiCondition,
            BackendKind::Sharded { shards: 3 },
        ] {
            let db = kind.build();
            assert_eq!(db.get("missing").unwrap(), None, "{kind}");
        }
    }
}

//! Hash-partitioned backend with one lock per shard.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;

use super::{read, write, Key, KeyValueDb, Value};
use crate::error::DbError;

/// Hash map split into independently locked shards.
///
/// Single-key operations only contend within a shard. Multi-key operations
/// lock every shard they touch, in ascending shard order, and hold all of
/// those locks while applying, so they are atomic across shards.
///
/// Conditional reads are not supported.
#[derive(Debug)]
pub struct ShardedHashMapBackend {
    shards: Vec<RwLock<HashMap<Key, Value>>>,
}

impl ShardedHashMapBackend {
    /// Type name used in logs and reports.
    pub const NAME: &'static str = "ShardedHashMapBackend";

    /// Creates an empty backend with `shards` shards.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is zero. Configuration validation rejects that
    /// value before a backend is built.
    #[must_use]
    pub fn new(shards: usize) -> Self {
        assert!(shards > 0, "a sharded backend needs at least one shard");
        Self {
            shards: (0..shards).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    /// Number of shards.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard a key belongs to.
    #[must_use]
    pub fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        // The remainder is below `shards.len()`, so it fits in usize.
        #[allow(clippy::cast_possible_truncation)]
        let shard = (hasher.finish() % self.shards.len() as u64) as usize;
        shard
    }

    /// Groups keys by shard. `BTreeMap` iteration gives the lock order.
    fn group_by_shard<'k>(&self, keys: impl IntoIterator<Item = &'k Key>) -> BTreeMap<usize, Vec<&'k Key>> {
        let mut grouped: BTreeMap<usize, Vec<&'k Key>> = BTreeMap::new();
        for key in keys {
            grouped.entry(self.shard_of(key)).or_default().push(key);
        }
        grouped
    }

    /// Copy of the current contents, merged across shards.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<Key, Value> {
        let guards: Vec<_> = self.shards.iter().map(read).collect();
        guards
            .iter()
            .flat_map(|shard| shard.iter().map(|(k, v)| (k.clone(), v.clone())))
            .collect()
    }

    /// Number of stored keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let guards: Vec<_> = self.shards.iter().map(read).collect();
        guards.iter().map(|shard| shard.len()).sum()
    }

    /// Whether no key is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for ShardedHashMapBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} shards, {} keys)",
            Self::NAME,
            self.shard_count(),
            self.len()
        )
    }
}

impl KeyValueDb for ShardedHashMapBackend {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), DbError> {
        let shard = self.shard_of(key);
        write(&self.shards[shard]).insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Value>, DbError> {
        let shard = self.shard_of(key);
        Ok(read(&self.shards[shard]).get(key).cloned())
    }

    fn multi_put(&self, pairs: &HashMap<Key, Value>) -> Result<(), DbError> {
        let grouped = self.group_by_shard(pairs.keys());

        let mut guards: Vec<_> = grouped
            .keys()
            .map(|&shard| write(&self.shards[shard]))
            .collect();

        for (guard, keys) in guards.iter_mut().zip(grouped.values()) {
            for key in keys {
                guard.insert((*key).clone(), pairs[*key].clone());
            }
        }
        Ok(())
    }

    fn multi_get(&self, keys: &HashSet<Key>) -> Result<HashMap<Key, Value>, DbError> {
        let grouped = self.group_by_shard(keys);

        let guards: Vec<_> = grouped
            .keys()
            .map(|&shard| read(&self.shards[shard]))
            .collect();

        let mut result = HashMap::with_capacity(keys.len());
        for (guard, keys) in guards.iter().zip(grouped.values()) {
            for key in keys {
                if let Some(value) = guard.get(*key) {
                    result.insert((*key).clone(), value.clone());
                }
            }
        }
        Ok(result)
    }

    fn get_when(
        &self,
        _key: &str,
        _key_cond: &str,
        _value_cond: &[u8],
    ) -> Result<Option<Value>, DbError> {
        Err(DbError::Unsupported {
            backend: Self::NAME,
            operation: "get_when",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_spread_over_shards() {
        let db = ShardedHashMapBackend::new(8);
        let pairs: HashMap<Key, Value> = (0..64u8)
            .map(|i| (format!("key{i}"), vec![i]))
            .collect();
        db.multi_put(&pairs).unwrap();

        assert_eq!(db.len(), 64);
        let used: HashSet<usize> = pairs.keys().map(|k| db.shard_of(k)).collect();
        assert!(used.len() > 1);
        assert_eq!(db.snapshot(), pairs);
    }

    #[test]
    fn shard_of_is_stable() {
        let db = ShardedHashMapBackend::new(16);
        assert_eq!(db.shard_of("abc"), db.shard_of("abc"));
        assert!(db.shard_of("abc") < 16);
    }

    #[test]
    fn multi_get_across_shards() {
        let db = ShardedHashMapBackend::new(4);
        for i in 0..10u8 {
            db.put(&format!("k{i}"), &[i]).unwrap();
        }
        let keys: HashSet<Key> = ["k1", "k5", "k9", "absent"]
            .into_iter()
            .map(String::from)
            .collect();
        let result = db.multi_get(&keys).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result["k5"], vec![5]);
    }

    #[test]
    fn get_when_is_unsupported() {
        let db = ShardedHashMapBackend::new(2);
        let err = db.get_when("a", "b", &[1]).unwrap_err();
        assert!(matches!(err, DbError::Unsupported { .. }));
    }

    #[test]
    #[should_panic(expected = "at least one shard")]
    fn zero_shards_panics() {
        let _ = ShardedHashMapBackend::new(0);
    }
}

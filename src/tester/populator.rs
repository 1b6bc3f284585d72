//! Creation of pre-filled databases for benchmarks.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use super::TesterError;
use crate::store::{BackendKind, Key, KeyValueDb, Value};

/// Number of distinct alphanumeric characters keys are built from.
const KEY_ALPHABET: u32 = 62;

/// Builds backends filled with random keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabasePopulator {
    kind: BackendKind,
    n_keys: usize,
    n_values: usize,
    key_length: usize,
    value_length: usize,
}

impl DatabasePopulator {
    /// Creates a populator for `kind` backends.
    ///
    /// # Errors
    ///
    /// Returns an error if no key or value would be generated, or if the
    /// lengths are too short to give the requested number of distinct keys
    /// or values.
    pub fn new(
        kind: BackendKind,
        n_keys: usize,
        n_values: usize,
        key_length: usize,
        value_length: usize,
    ) -> Result<Self, TesterError> {
        if n_keys == 0 || n_values == 0 {
            return Err(TesterError::InvalidParameters(
                "at least one key and one value are required".to_string(),
            ));
        }
        if !fits(KEY_ALPHABET, key_length, n_keys) {
            return Err(TesterError::InvalidParameters(format!(
                "{n_keys} distinct keys do not fit in {key_length} characters"
            )));
        }
        if !fits(256, value_length, n_values) {
            return Err(TesterError::InvalidParameters(format!(
                "{n_values} distinct values do not fit in {value_length} bytes"
            )));
        }

        Ok(Self {
            kind,
            n_keys,
            n_values,
            key_length,
            value_length,
        })
    }

    /// Backend this populator builds.
    #[must_use]
    pub const fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Number of keys in every database.
    #[must_use]
    pub const fn n_keys(&self) -> usize {
        self.n_keys
    }

    /// Number of distinct values keys are assigned from.
    #[must_use]
    pub const fn n_values(&self) -> usize {
        self.n_values
    }

    /// Builds a fresh backend where every key holds one of the valid values.
    ///
    /// # Errors
    ///
    /// Returns an error if filling the backend fails.
    pub fn new_database<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<PopulatedDatabase, TesterError> {
        let valid_keys = self.generate_keys(rng);
        let valid_values = self.generate_values(rng);

        let contents: HashMap<Key, Value> = valid_keys
            .iter()
            .map(|key| {
                let value = &valid_values[rng.gen_range(0..valid_values.len())];
                (key.clone(), value.clone())
            })
            .collect();

        let database = self.kind.build();
        database.multi_put(&contents)?;

        Ok(PopulatedDatabase {
            database,
            valid_keys,
            valid_values,
        })
    }

    fn generate_keys<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Key> {
        let mut keys = HashSet::with_capacity(self.n_keys);
        while keys.len() < self.n_keys {
            let key: String = (0..self.key_length)
                .map(|_| char::from(rng.sample(Alphanumeric)))
                .collect();
            keys.insert(key);
        }
        keys.into_iter().collect()
    }

    fn generate_values<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Value> {
        let mut values = HashSet::with_capacity(self.n_values);
        while values.len() < self.n_values {
            let mut value = vec![0u8; self.value_length];
            rng.fill(value.as_mut_slice());
            values.insert(value);
        }
        values.into_iter().collect()
    }
}

impl fmt::Display for DatabasePopulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DatabasePopulator(kind = {}, n_keys = {}, n_values = {}, key_length = {}, value_length = {})",
            self.kind, self.n_keys, self.n_values, self.key_length, self.value_length
        )
    }
}

/// Whether `alphabet^length >= count`.
fn fits(alphabet: u32, length: usize, count: usize) -> bool {
    let mut capacity: usize = 1;
    for _ in 0..length {
        capacity = capacity.saturating_mul(alphabet as usize);
        if capacity >= count {
            return true;
        }
    }
    capacity >= count
}

/// A filled backend together with the keys and values it was filled from.
pub struct PopulatedDatabase {
    /// The backend.
    pub database: Arc<dyn KeyValueDb>,
    /// Every key stored in the backend.
    pub valid_keys: Vec<Key>,
    /// Values the keys were assigned from.
    pub valid_values: Vec<Value>,
}

impl fmt::Debug for PopulatedDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulatedDatabase")
            .field("valid_keys", &self.valid_keys.len())
            .field("valid_values", &self.valid_values.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn populates_every_key() {
        let populator = DatabasePopulator::new(BackendKind::Simple, 32, 8, 6, 4).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let populated = populator.new_database(&mut rng).unwrap();

        assert_eq!(populated.valid_keys.len(), 32);
        assert_eq!(populated.valid_values.len(), 8);

        let keys: HashSet<Key> = populated.valid_keys.iter().cloned().collect();
        assert_eq!(keys.len(), 32);
        let stored = populated.database.multi_get(&keys).unwrap();
        assert_eq!(stored.len(), 32);

        for (key, value) in stored {
            assert_eq!(key.len(), 6);
            assert!(key.chars().all(|c| c.is_ascii_alphanumeric()));
            assert!(populated.valid_values.contains(&value));
        }
    }

    #[test]
    fn every_call_builds_a_new_backend() {
        let populator = DatabasePopulator::new(BackendKind::Sharded { shards: 4 }, 4, 2, 4, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let first = populator.new_database(&mut rng).unwrap();
        let second = populator.new_database(&mut rng).unwrap();

        first.database.put("extra", &[1]).unwrap();
        assert_eq!(second.database.get("extra").unwrap(), None);
    }

    #[test]
    fn rejects_impossible_parameters() {
        assert!(DatabasePopulator::new(BackendKind::Simple, 0, 1, 4, 4).is_err());
        assert!(DatabasePopulator::new(BackendKind::Simple, 100, 1, 1, 4).is_err());
        assert!(DatabasePopulator::new(BackendKind::Simple, 1, 300, 4, 1).is_err());
        assert!(DatabasePopulator::new(BackendKind::Simple, 62, 256, 1, 1).is_ok());
    }
}

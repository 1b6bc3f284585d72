//! One timed benchmark run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use super::{DatabasePopulator, Operation, OperationDistribution, PopulatedDatabase, TestResults, TesterError};
use crate::error::DbError;
use crate::store::{Key, KeyValueDb, Value};

/// Uniformly sampled integers in `low..=high`.
#[derive(Debug, Clone, Copy)]
pub struct IndexRange {
    low: i64,
    high: i64,
    uniform: Uniform<i64>,
}

impl IndexRange {
    /// Creates the range, swapping reversed bounds.
    #[must_use]
    pub fn new(low: i64, high: i64) -> Self {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        Self {
            low,
            high,
            uniform: Uniform::new_inclusive(low, high),
        }
    }

    /// Smallest sampled value.
    #[must_use]
    pub const fn low(&self) -> i64 {
        self.low
    }

    /// Largest sampled value.
    #[must_use]
    pub const fn high(&self) -> i64 {
        self.high
    }

    /// Distinct indices of `0..len` reachable once samples are clamped.
    fn reachable(&self, len: usize) -> usize {
        clamp_index(self.high, len) - clamp_index(self.low, len) + 1
    }
}

impl Distribution<i64> for IndexRange {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        self.uniform.sample(rng)
    }
}

/// Shape of the load a benchmark generates.
#[derive(Debug, Clone, Copy)]
pub struct Workload {
    /// Worker threads issuing operations.
    pub n_threads: usize,
    /// Total operations across all workers.
    pub n_operations: usize,
    /// Operations a worker claims at a time.
    pub block_size: usize,
    /// Index into the valid keys, clamped into range.
    pub keys: IndexRange,
    /// Index into the valid values, clamped into range.
    pub values: IndexRange,
    /// Number of keys in a multi-key operation, clamped into range.
    pub multi_count: IndexRange,
}

/// A condition a worker is currently blocked on.
type Condition = Option<(Key, Value)>;

/// Runs a workload against a freshly populated backend.
#[derive(Debug, Clone)]
pub struct Benchmark {
    populator: DatabasePopulator,
    distribution: OperationDistribution,
    workload: Workload,
}

impl Benchmark {
    /// Creates a benchmark.
    ///
    /// # Errors
    ///
    /// Returns an error if the workload has no worker or a zero block size,
    /// if its multi-key operations can ask for more distinct keys than the
    /// key range reaches, or if it asks for conditional reads on a backend
    /// without them.
    pub fn new(
        populator: DatabasePopulator,
        distribution: OperationDistribution,
        workload: Workload,
    ) -> Result<Self, TesterError> {
        if workload.n_threads == 0 || workload.block_size == 0 {
            return Err(TesterError::InvalidParameters(
                "a benchmark needs at least one thread and a non-zero block size".to_string(),
            ));
        }
        if distribution.uses_multi_key() {
            let n_keys = populator.n_keys();
            let largest = clamp_index(workload.multi_count.high(), n_keys);
            let reachable = workload.keys.reachable(n_keys);
            if largest > reachable {
                return Err(TesterError::InvalidParameters(format!(
                    "multi-key operations need up to {largest} distinct keys \
                     but the key range only reaches {reachable}"
                )));
            }
        }
        if distribution.uses_get_when() && !populator.kind().supports_get_when() {
            return Err(TesterError::InvalidParameters(format!(
                "{} does not support get_when",
                populator.kind()
            )));
        }
        Ok(Self {
            populator,
            distribution,
            workload,
        })
    }

    /// Runs the benchmark and merges the workers' results.
    ///
    /// The total run time is recorded only when no conditional reads are
    /// issued, since those runs are paced by the unlocker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if populating the backend or any operation fails.
    pub fn run(&self) -> Result<TestResults, TesterError> {
        let mut seeder = StdRng::from_entropy();
        let populated = self.populator.new_database(&mut seeder)?;
        let seeds: Vec<u64> = (0..self.workload.n_threads).map(|_| seeder.gen()).collect();

        let issued = AtomicUsize::new(0);
        let workers_done = AtomicBool::new(false);
        let conditions: Vec<Mutex<Condition>> =
            (0..self.workload.n_threads).map(|_| Mutex::new(None)).collect();

        info!(
            backend = %self.populator.kind(),
            threads = self.workload.n_threads,
            operations = self.workload.n_operations,
            "Starting benchmark"
        );
        let start = Instant::now();

        let outcome = thread::scope(|scope| {
            let unlocker = self.distribution.uses_get_when().then(|| {
                scope.spawn(|| unlock_loop(populated.database.as_ref(), &conditions, &workers_done))
            });

            let workers: Vec<_> = seeds
                .iter()
                .zip(&conditions)
                .map(|(&seed, condition)| {
                    let (populated, issued) = (&populated, &issued);
                    scope.spawn(move || self.worker_loop(populated, issued, condition, seed))
                })
                .collect();

            let mut merged: Result<TestResults, TesterError> = Ok(TestResults::new());
            for worker in workers {
                let result = worker
                    .join()
                    .map_err(|_| TesterError::WorkerPanicked)
                    .and_then(|result| result.map_err(TesterError::from));
                merged = merged.and_then(|mut total: TestResults| {
                    total.merge(&result?);
                    Ok(total)
                });
            }

            workers_done.store(true, Ordering::Release);
            if let Some(unlocker) = unlocker {
                let unlocked = unlocker.join().map_err(|_| TesterError::WorkerPanicked);
                merged = merged.and_then(|total| unlocked?.map(|()| total).map_err(TesterError::from));
            }
            merged
        });

        let mut results = outcome?;
        let elapsed = start.elapsed();
        if !self.distribution.uses_get_when() {
            results.set_test_time(elapsed);
        }
        debug!(elapsed = ?elapsed, %results, "Benchmark finished");
        Ok(results)
    }

    /// Claims blocks of operations until all have been issued.
    fn worker_loop(
        &self,
        populated: &PopulatedDatabase,
        issued: &AtomicUsize,
        condition: &Mutex<Condition>,
        seed: u64,
    ) -> Result<TestResults, DbError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut results = TestResults::new();
        let db = populated.database.as_ref();
        let workload = &self.workload;

        loop {
            let claimed = issued.fetch_add(workload.block_size, Ordering::Relaxed);
            if claimed >= workload.n_operations {
                break;
            }
            let block = workload.block_size.min(workload.n_operations - claimed);

            for _ in 0..block {
                let operation = self.distribution.sample(&mut rng);
                let nanos = match operation {
                    Operation::Put => {
                        let key = pick(&populated.valid_keys, workload.keys, &mut rng);
                        let value = pick(&populated.valid_values, workload.values, &mut rng);
                        timed(|| db.put(key, value))?
                    }
                    Operation::Get => {
                        let key = pick(&populated.valid_keys, workload.keys, &mut rng);
                        timed(|| db.get(key))?
                    }
                    Operation::MultiPut => {
                        let pairs = self.random_pairs(populated, &mut rng);
                        timed(|| db.multi_put(&pairs))?
                    }
                    Operation::MultiGet => {
                        let keys = self.random_keys(populated, &mut rng);
                        timed(|| db.multi_get(&keys))?
                    }
                    Operation::GetWhen => {
                        let key = pick(&populated.valid_keys, workload.keys, &mut rng);
                        let key_cond = pick(&populated.valid_keys, workload.keys, &mut rng);
                        let value_cond = pick(&populated.valid_values, workload.values, &mut rng);

                        set_condition(condition, Some((key_cond.clone(), value_cond.clone())));
                        let outcome = timed(|| db.get_when(key, key_cond, value_cond));
                        set_condition(condition, None);
                        outcome?
                    }
                };
                results.add_sample(operation, nanos);
            }
        }

        Ok(results)
    }

    /// Number of keys in a multi-key operation.
    fn multi_count<R: Rng>(&self, populated: &PopulatedDatabase, rng: &mut R) -> usize {
        clamp_index(self.workload.multi_count.sample(rng), populated.valid_keys.len())
    }

    fn random_keys<R: Rng>(&self, populated: &PopulatedDatabase, rng: &mut R) -> HashSet<Key> {
        let count = self.multi_count(populated, rng);
        let mut keys = HashSet::with_capacity(count);
        while keys.len() < count {
            keys.insert(pick(&populated.valid_keys, self.workload.keys, rng).clone());
        }
        keys
    }

    fn random_pairs<R: Rng>(
        &self,
        populated: &PopulatedDatabase,
        rng: &mut R,
    ) -> HashMap<Key, Value> {
        self.random_keys(populated, rng)
            .into_iter()
            .map(|key| {
                let value = pick(&populated.valid_values, self.workload.values, rng).clone();
                (key, value)
            })
            .collect()
    }
}

impl fmt::Display for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Benchmark({}, {}, {} threads, {} operations)",
            self.populator, self.distribution, self.workload.n_threads, self.workload.n_operations
        )
    }
}

/// Clamps a sampled index into `0..len`.
fn clamp_index(sample: i64, len: usize) -> usize {
    let max = len.saturating_sub(1);
    usize::try_from(sample.max(0)).map_or(max, |i| i.min(max))
}

fn pick<'a, T, R: Rng>(items: &'a [T], dist: IndexRange, rng: &mut R) -> &'a T {
    &items[clamp_index(dist.sample(rng), items.len())]
}

/// Runs `op` and returns its duration in nanoseconds.
fn timed<T, E>(op: impl FnOnce() -> Result<T, E>) -> Result<u64, E> {
    let start = Instant::now();
    op()?;
    Ok(u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX))
}

fn set_condition(slot: &Mutex<Condition>, condition: Condition) {
    *slot.lock().unwrap_or_else(PoisonError::into_inner) = condition;
}

/// Keeps writing the values workers are waiting for until every worker is
/// done.
fn unlock_loop(
    db: &dyn KeyValueDb,
    conditions: &[Mutex<Condition>],
    workers_done: &AtomicBool,
) -> Result<(), DbError> {
    while !workers_done.load(Ordering::Acquire) {
        let mut unlocker: HashMap<Key, Value> = HashMap::new();
        for slot in conditions {
            if let Some((key, value)) = slot.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                unlocker.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        if unlocker.is_empty() {
            thread::yield_now();
        } else {
            db.multi_put(&unlocker)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::BackendKind;

    fn workload(n_threads: usize, n_operations: usize) -> Workload {
        Workload {
            n_threads,
            n_operations,
            block_size: 16,
            keys: IndexRange::new(0, 15),
            values: IndexRange::new(0, 7),
            multi_count: IndexRange::new(2, 4),
        }
    }

    fn populator(kind: BackendKind) -> DatabasePopulator {
        DatabasePopulator::new(kind, 16, 8, 4, 4).unwrap()
    }

    #[test]
    fn issues_exactly_the_requested_operations() {
        let dist = OperationDistribution::new(0.25, 0.25, 0.25, 0.25, 0.0).unwrap();
        let bench = Benchmark::new(populator(BackendKind::Simple), dist, workload(3, 1000)).unwrap();
        let results = bench.run().unwrap();

        let total: u64 = Operation::TIMED.iter().map(|op| results.count(*op)).sum();
        assert_eq!(total, 1000);
        assert!(results.test_time().is_some());
    }

    #[test]
    fn get_when_runs_complete() {
        let dist = OperationDistribution::new(0.25, 0.20, 0.25, 0.25, 0.05).unwrap();
        let bench =
            Benchmark::new(populator(BackendKind::MultiCondition), dist, workload(4, 2000)).unwrap();
        let results = bench.run().unwrap();

        let timed: u64 = Operation::TIMED.iter().map(|op| results.count(*op)).sum();
        assert!(timed > 0 && timed <= 2000);
        assert!(results.test_time().is_none());
    }

    #[test]
    fn get_when_on_sharded_backend_is_rejected() {
        let dist = OperationDistribution::new(0.25, 0.20, 0.25, 0.25, 0.05).unwrap();
        let err = Benchmark::new(populator(BackendKind::Sharded { shards: 4 }), dist, workload(1, 10))
            .unwrap_err();
        assert!(matches!(err, TesterError::InvalidParameters(_)));
    }

    #[test]
    fn narrow_key_range_is_rejected_for_multi_key_mixes() {
        let narrow = Workload {
            keys: IndexRange::new(0, 0),
            multi_count: IndexRange::new(2, 4),
            ..workload(1, 10)
        };

        let multi_get = OperationDistribution::new(0.0, 0.0, 0.0, 1.0, 0.0).unwrap();
        let err = Benchmark::new(populator(BackendKind::Simple), multi_get, narrow).unwrap_err();
        assert!(matches!(err, TesterError::InvalidParameters(_)), "{err:?}");

        // Single-key mixes never need more than one key.
        let single = OperationDistribution::new(0.5, 0.5, 0.0, 0.0, 0.0).unwrap();
        let results = Benchmark::new(populator(BackendKind::Simple), single, narrow)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(results.count(Operation::Put) + results.count(Operation::Get), 10);
    }

    #[test]
    fn multi_key_mix_fills_exactly_reachable_keys() {
        // Four reachable keys, up to four per operation.
        let tight = Workload {
            keys: IndexRange::new(12, 40),
            multi_count: IndexRange::new(4, 4),
            ..workload(2, 200)
        };
        let dist = OperationDistribution::new(0.0, 0.0, 0.5, 0.5, 0.0).unwrap();
        let results = Benchmark::new(populator(BackendKind::Simple), dist, tight)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(
            results.count(Operation::MultiPut) + results.count(Operation::MultiGet),
            200
        );
    }

    #[test]
    fn index_ranges_count_reachable_indices() {
        assert_eq!(IndexRange::new(0, 15).reachable(16), 16);
        assert_eq!(IndexRange::new(-3, 2).reachable(16), 3);
        assert_eq!(IndexRange::new(12, 40).reachable(16), 4);
        assert_eq!(IndexRange::new(5, 1).low(), 1);
    }

    #[test]
    fn indices_are_clamped() {
        assert_eq!(clamp_index(-5, 10), 0);
        assert_eq!(clamp_index(3, 10), 3);
        assert_eq!(clamp_index(99, 10), 9);
    }
}

//! The full benchmark grid and its CSV reports.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{
    Benchmark, DatabasePopulator, IndexRange, Operation, OperationDistribution, TestResults,
    TesterError, Workload,
};
use crate::store::BackendKind;

/// Named operation mixes: (name, put, get, multi_put, multi_get, get_when).
const DISTRIBUTIONS: [(&str, [f64; 5]); 3] = [
    ("Mostly reads", [0.05, 0.70, 0.0, 0.25, 0.0]),
    ("Balanced", [0.25, 0.25, 0.25, 0.25, 0.0]),
    ("Balanced with getWhen", [0.25, 0.20, 0.25, 0.25, 0.05]),
];

/// Knobs of a [`TestSuite`]. The defaults reproduce the reference grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteSettings {
    /// Worker thread counts to run every combination with.
    pub thread_counts: Vec<usize>,
    /// Operations per run without conditional reads.
    pub operations: usize,
    /// Operations per run with conditional reads.
    pub get_when_operations: usize,
    /// Operations a worker claims at a time.
    pub block_size: usize,
    /// Keys in every populated backend.
    pub n_keys: usize,
    /// Distinct values keys are assigned from.
    pub n_values: usize,
    /// Length of generated keys, in characters.
    pub key_length: usize,
    /// Length of generated values, in bytes.
    pub value_length: usize,
    /// Shards of the sharded backend.
    pub shards: usize,
}

impl Default for SuiteSettings {
    fn default() -> Self {
        Self {
            thread_counts: vec![1, 2, 4, 8, 16],
            operations: 1 << 23,
            get_when_operations: 1 << 20,
            block_size: 4096,
            n_keys: 128,
            n_values: 128,
            key_length: 8,
            value_length: 8,
            shards: 64,
        }
    }
}

/// Runs every backend under every operation mix and thread count.
#[derive(Debug, Clone)]
pub struct TestSuite {
    output_dir: PathBuf,
    settings: SuiteSettings,
}

/// Total run times of one operation mix: seconds by thread count, then by
/// backend name.
type Times = BTreeMap<usize, BTreeMap<&'static str, f64>>;

impl TestSuite {
    /// Creates a suite writing its reports to `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>, settings: SuiteSettings) -> Self {
        Self {
            output_dir: output_dir.into(),
            settings,
        }
    }

    /// Directory the reports are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Backends under test.
    #[must_use]
    pub fn backends(&self) -> [BackendKind; 3] {
        [
            BackendKind::Simple,
            BackendKind::MultiCondition,
            BackendKind::Sharded {
                shards: self.settings.shards,
            },
        ]
    }

    /// Runs the whole grid.
    ///
    /// Writes `<Backend>_<Mix>_<n>_<thread|threads>.csv` with the mean and
    /// standard deviation of each operation after every run, and finally
    /// `<Mix>.csv` with total run times for every mix without conditional
    /// reads. `on_export` is called with the path of each written file.
    ///
    /// # Errors
    ///
    /// Returns an error if a benchmark fails or a report cannot be written.
    pub fn run(&self, mut on_export: impl FnMut(&Path)) -> Result<(), TesterError> {
        fs::create_dir_all(&self.output_dir).map_err(|source| TesterError::Io {
            path: self.output_dir.clone(),
            source,
        })?;

        let mut times: Vec<(&'static str, Times)> = Vec::new();

        for &n_threads in &self.settings.thread_counts {
            for (name, [put, get, multi_put, multi_get, get_when]) in DISTRIBUTIONS {
                let distribution =
                    OperationDistribution::new(put, get, multi_put, multi_get, get_when)?;

                for kind in self.backends() {
                    if distribution.uses_get_when() && !kind.supports_get_when() {
                        continue;
                    }

                    info!(%kind, mix = name, threads = n_threads, "Running benchmark");
                    let results = self.benchmark(kind, distribution, n_threads)?.run()?;

                    let path = self.output_dir.join(format!(
                        "{}_{}_{n_threads}_{}.csv",
                        kind.name(),
                        file_stem(name),
                        if n_threads > 1 { "threads" } else { "thread" }
                    ));
                    write_results(&path, &results)?;
                    on_export(&path);

                    if let Some(time) = results.test_time() {
                        let index = match times.iter().position(|(n, _)| *n == name) {
                            Some(index) => index,
                            None => {
                                times.push((name, Times::new()));
                                times.len() - 1
                            }
                        };
                        times[index]
                            .1
                            .entry(n_threads)
                            .or_default()
                            .insert(kind.name(), time.as_secs_f64());
                    }
                }
            }
        }

        for (name, by_threads) in &times {
            let path = self.output_dir.join(format!("{}.csv", file_stem(name)));
            self.write_times(&path, by_threads)?;
            on_export(&path);
        }

        Ok(())
    }

    fn benchmark(
        &self,
        kind: BackendKind,
        distribution: OperationDistribution,
        n_threads: usize,
    ) -> Result<Benchmark, TesterError> {
        let s = &self.settings;
        let populator =
            DatabasePopulator::new(kind, s.n_keys, s.n_values, s.key_length, s.value_length)?;

        let workload = Workload {
            n_threads,
            n_operations: if distribution.uses_get_when() {
                s.get_when_operations
            } else {
                s.operations
            },
            block_size: s.block_size,
            keys: IndexRange::new(0, max_index(s.n_keys)),
            values: IndexRange::new(0, max_index(s.n_values)),
            multi_count: IndexRange::new(2, 4),
        };

        Benchmark::new(populator, distribution, workload)
    }

    fn write_times(&self, path: &Path, by_threads: &Times) -> Result<(), TesterError> {
        let backends: Vec<&str> = self
            .backends()
            .iter()
            .map(|kind| kind.name())
            .filter(|name| by_threads.values().any(|row| row.contains_key(name)))
            .collect();

        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(std::iter::once("THREADS").chain(backends.iter().copied()))?;
        for (n_threads, row) in by_threads {
            let mut record = vec![n_threads.to_string()];
            record.extend(
                backends
                    .iter()
                    .map(|name| row.get(name).map(f64::to_string).unwrap_or_default()),
            );
            writer.write_record(&record)?;
        }
        writer.flush().map_err(|source| TesterError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl fmt::Display for TestSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TestSuite(output_dir = {})", self.output_dir.display())
    }
}

fn file_stem(name: &str) -> String {
    name.replace(' ', "_")
}

fn max_index(len: usize) -> i64 {
    i64::try_from(len.saturating_sub(1)).unwrap_or(i64::MAX)
}

/// Writes `OPERATION,AVG,STDEV` rows; operations without samples get empty
/// cells.
fn write_results(path: &Path, results: &TestResults) -> Result<(), TesterError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["OPERATION", "AVG", "STDEV"])?;
    for operation in Operation::TIMED {
        let cell = |value: Option<f64>| value.map(|v| v.to_string()).unwrap_or_default();
        writer.write_record([
            operation.name().to_string(),
            cell(results.average(operation)),
            cell(results.stdev(operation)),
        ])?;
    }
    writer.flush().map_err(|source| TesterError::Io {
        path: path.to_path_buf(),
        source,
    })
}

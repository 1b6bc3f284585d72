//! Benchmark harness for the storage backends.
//!
//! A [`Benchmark`] populates a fresh backend, then lets several threads
//! issue a random mix of operations against it while timing each one. A
//! [`TestSuite`] runs benchmarks over a grid of thread counts, operation
//! mixes and backends, and exports the results as CSV.

mod benchmark;
mod distribution;
mod populator;
mod results;
mod suite;

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::DbError;

pub use benchmark::{Benchmark, IndexRange, Workload};
pub use distribution::OperationDistribution;
pub use populator::{DatabasePopulator, PopulatedDatabase};
pub use results::TestResults;
pub use suite::{SuiteSettings, TestSuite};

/// Operations a benchmark issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Single-key write.
    Put,
    /// Single-key read.
    Get,
    /// Multi-key write.
    MultiPut,
    /// Multi-key read.
    MultiGet,
    /// Conditional read.
    GetWhen,
}

impl Operation {
    /// Operations whose latency is recorded. `GetWhen` latency mostly
    /// measures how long the condition took to become true, so it is left
    /// out.
    pub const TIMED: [Self; 4] = [Self::Put, Self::Get, Self::MultiPut, Self::MultiGet];

    /// Name used in reports.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Put => "PUT",
            Self::Get => "GET",
            Self::MultiPut => "MULTI_PUT",
            Self::MultiGet => "MULTI_GET",
            Self::GetWhen => "GET_WHEN",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can occur while benchmarking.
#[derive(Debug, Error)]
pub enum TesterError {
    /// Operation weights do not add up to one.
    #[error("operation probabilities add up to {sum}, not 1")]
    InvalidDistribution {
        /// Sum of the given weights.
        sum: f64,
    },

    /// Benchmark or population parameters are unusable.
    #[error("invalid benchmark parameters: {0}")]
    InvalidParameters(String),

    /// A database operation failed during a run.
    #[error("database operation failed")]
    Database(#[from] DbError),

    /// A worker thread panicked.
    #[error("benchmark worker panicked")]
    WorkerPanicked,

    /// A report file could not be written.
    #[error("failed to write {path}")]
    Io {
        /// File or directory being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A report could not be serialised.
    #[error("failed to write CSV report")]
    Csv(#[from] csv::Error),
}

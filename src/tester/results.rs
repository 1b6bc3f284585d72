//! Latency statistics collected during a benchmark.

use std::fmt;
use std::time::Duration;

use super::Operation;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Samples {
    sum: u128,
    sum_squares: u128,
    count: u64,
}

/// Per-operation latency sums, from which mean and standard deviation are
/// derived. `GetWhen` samples are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResults {
    samples: [Samples; 4],
    test_time: Option<Duration>,
}

const fn slot(operation: Operation) -> Option<usize> {
    match operation {
        Operation::Put => Some(0),
        Operation::Get => Some(1),
        Operation::MultiPut => Some(2),
        Operation::MultiGet => Some(3),
        Operation::GetWhen => None,
    }
}

#[allow(clippy::cast_precision_loss)] // Latency sums are far below 2^52 ns per sample.
impl TestResults {
    /// Creates empty results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one latency, in nanoseconds.
    pub fn add_sample(&mut self, operation: Operation, nanos: u64) {
        if let Some(i) = slot(operation) {
            let samples = &mut self.samples[i];
            samples.sum += u128::from(nanos);
            samples.sum_squares += u128::from(nanos) * u128::from(nanos);
            samples.count += 1;
        }
    }

    /// Adds another thread's samples to these.
    pub fn merge(&mut self, other: &Self) {
        for (mine, theirs) in self.samples.iter_mut().zip(&other.samples) {
            mine.sum += theirs.sum;
            mine.sum_squares += theirs.sum_squares;
            mine.count += theirs.count;
        }
    }

    /// Number of recorded samples.
    #[must_use]
    pub fn count(&self, operation: Operation) -> u64 {
        slot(operation).map_or(0, |i| self.samples[i].count)
    }

    /// Mean latency in nanoseconds, `None` without samples.
    #[must_use]
    pub fn average(&self, operation: Operation) -> Option<f64> {
        let samples = self.samples[slot(operation)?];
        (samples.count > 0).then(|| samples.sum as f64 / samples.count as f64)
    }

    /// Population standard deviation in nanoseconds, `None` without samples.
    #[must_use]
    pub fn stdev(&self, operation: Operation) -> Option<f64> {
        let samples = self.samples[slot(operation)?];
        if samples.count == 0 {
            return None;
        }
        let n = samples.count as f64;
        let average = samples.sum as f64 / n;
        let variance = samples.sum_squares as f64 / n - average * average;
        // Rounding can push a zero variance slightly negative.
        Some(variance.max(0.0).sqrt())
    }

    /// Wall-clock time of the whole run, when recorded.
    #[must_use]
    pub const fn test_time(&self) -> Option<Duration> {
        self.test_time
    }

    /// Records the wall-clock time of the whole run.
    pub fn set_test_time(&mut self, time: Duration) {
        self.test_time = Some(time);
    }
}

impl fmt::Display for TestResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TestResults(")?;
        for (i, operation) in Operation::TIMED.into_iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{operation}: ")?;
            match (self.average(operation), self.stdev(operation)) {
                (Some(avg), Some(stdev)) => write!(f, "avg = {avg:.1} ns, stdev = {stdev:.1} ns")?,
                _ => f.write_str("no samples")?,
            }
        }
        f.write_str(")")
    }
}

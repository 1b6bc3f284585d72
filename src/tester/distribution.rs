//! Random choice of the next benchmark operation.

use std::fmt;

use rand::Rng;

use super::{Operation, TesterError};

/// Largest accepted distance between the weight sum and 1.
const TOLERANCE: f64 = 0.001;

/// Probabilities of each [`Operation`].
///
/// Stored as cumulative thresholds so sampling is one draw and a few
/// comparisons.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationDistribution {
    put: f64,
    get: f64,
    multi_put: f64,
    multi_get: f64,
    get_when: f64,
}

impl OperationDistribution {
    /// Creates a distribution from per-operation weights.
    ///
    /// # Errors
    ///
    /// Returns an error if a weight is negative or the weights do not add up
    /// to 1 (within 0.001).
    pub fn new(
        put: f64,
        get: f64,
        multi_put: f64,
        multi_get: f64,
        get_when: f64,
    ) -> Result<Self, TesterError> {
        let weights = [put, get, multi_put, multi_get, get_when];
        let sum: f64 = weights.iter().sum();
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) || (1.0 - sum).abs() > TOLERANCE {
            return Err(TesterError::InvalidDistribution { sum });
        }

        let get = put + get;
        let multi_put = get + multi_put;
        let multi_get = multi_put + multi_get;
        Ok(Self {
            put,
            get,
            multi_put,
            multi_get,
            get_when: multi_get + get_when,
        })
    }

    /// Probability of [`Operation::Put`].
    #[must_use]
    pub const fn put(&self) -> f64 {
        self.put
    }

    /// Probability of [`Operation::Get`].
    #[must_use]
    pub fn get(&self) -> f64 {
        self.get - self.put
    }

    /// Probability of [`Operation::MultiPut`].
    #[must_use]
    pub fn multi_put(&self) -> f64 {
        self.multi_put - self.get
    }

    /// Probability of [`Operation::MultiGet`].
    #[must_use]
    pub fn multi_get(&self) -> f64 {
        self.multi_get - self.multi_put
    }

    /// Probability of [`Operation::GetWhen`].
    #[must_use]
    pub fn get_when(&self) -> f64 {
        self.get_when - self.multi_get
    }

    /// Whether conditional reads can be drawn.
    #[must_use]
    pub fn uses_get_when(&self) -> bool {
        self.get_when() > 0.0
    }

    /// Whether multi-key operations can be drawn.
    #[must_use]
    pub fn uses_multi_key(&self) -> bool {
        self.multi_put() > 0.0 || self.multi_get() > 0.0
    }

    /// Draws an operation.
    ///
    /// Never returns an operation whose probability is zero, even if
    /// rounding leaves the last threshold slightly below 1.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Operation {
        let x: f64 = rng.gen();
        if x < self.put {
            Operation::Put
        } else if x < self.get {
            Operation::Get
        } else if x < self.multi_put {
            Operation::MultiPut
        } else if x < self.multi_get {
            Operation::MultiGet
        } else {
            self.last_drawable()
        }
    }

    /// The last operation with a non-zero probability.
    fn last_drawable(&self) -> Operation {
        [
            (Operation::GetWhen, self.get_when()),
            (Operation::MultiGet, self.multi_get()),
            (Operation::MultiPut, self.multi_put()),
            (Operation::Get, self.get()),
            (Operation::Put, self.put()),
        ]
        .into_iter()
        .find(|(_, weight)| *weight > 0.0)
        .map_or(Operation::Get, |(operation, _)| operation)
    }
}

impl fmt::Display for OperationDistribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OperationDistribution(put = {:.3}, get = {:.3}, multi_put = {:.3}, multi_get = {:.3}, get_when = {:.3})",
            self.put(),
            self.get(),
            self.multi_put(),
            self.multi_get(),
            self.get_when()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn weights_must_sum_to_one() {
        assert!(OperationDistribution::new(0.25, 0.25, 0.25, 0.25, 0.0).is_ok());
        assert!(OperationDistribution::new(0.25, 0.25, 0.25, 0.2495, 0.0).is_ok());
        assert!(matches!(
            OperationDistribution::new(0.5, 0.25, 0.0, 0.0, 0.0),
            Err(TesterError::InvalidDistribution { .. })
        ));
        assert!(OperationDistribution::new(1.5, -0.5, 0.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn getters_undo_accumulation() {
        let dist = OperationDistribution::new(0.25, 0.20, 0.25, 0.25, 0.05).unwrap();
        assert!((dist.get() - 0.20).abs() < 1e-9);
        assert!((dist.get_when() - 0.05).abs() < 1e-9);
        assert!(dist.uses_get_when());
    }

    #[test]
    fn sampling_follows_weights() {
        let dist = OperationDistribution::new(0.05, 0.70, 0.0, 0.25, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let mut counts = [0usize; 5];
        for _ in 0..100_000 {
            let index = match dist.sample(&mut rng) {
                Operation::Put => 0,
                Operation::Get => 1,
                Operation::MultiPut => 2,
                Operation::MultiGet => 3,
                Operation::GetWhen => 4,
            };
            counts[index] += 1;
        }

        assert_eq!(counts[2], 0);
        assert_eq!(counts[4], 0);
        assert!((60_000..80_000).contains(&counts[1]), "{counts:?}");
        assert!((20_000..30_000).contains(&counts[3]), "{counts:?}");
    }

    #[test]
    fn rounding_gap_only_yields_weighted_operations() {
        // Thresholds end at 0.9995; draws above fall back to MULTI_GET.
        let dist = OperationDistribution::new(0.0, 0.0, 0.0, 0.9995, 0.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100_000 {
            assert_eq!(dist.sample(&mut rng), Operation::MultiGet);
        }
        assert_eq!(dist.last_drawable(), Operation::MultiGet);

        let dist = OperationDistribution::new(0.4995, 0.0, 0.5, 0.0, 0.0).unwrap();
        assert_eq!(dist.last_drawable(), Operation::MultiPut);

        let dist = OperationDistribution::new(0.5, 0.0, 0.0, 0.0, 0.4995).unwrap();
        assert_eq!(dist.last_drawable(), Operation::GetWhen);
    }

    #[test]
    fn multi_key_use_follows_weights() {
        assert!(!OperationDistribution::new(0.5, 0.5, 0.0, 0.0, 0.0)
            .unwrap()
            .uses_multi_key());
        assert!(OperationDistribution::new(0.5, 0.0, 0.0, 0.5, 0.0)
            .unwrap()
            .uses_multi_key());
    }
}

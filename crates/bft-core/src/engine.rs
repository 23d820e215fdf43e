//! Isolation boundary for the two external collaborators named in §1 as
//! out of scope: the NN/autodiff engine and the data-loading pipeline. The
//! core only requires a "fetch batch indices `[a, b)`" primitive and a
//! "given parameters, a batch, and a seed, emit per-layer gradients"
//! primitive — everything else about how those are implemented is someone
//! else's problem (§9 redesign note: "external autodiff dependency").

use crate::error::Result;
use crate::model::ParameterVector;
use crate::tensor::Tensor;

/// A contiguous half-open range of dataset indices, `[start, start+len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Batch {
    pub start: usize,
    pub len: usize,
}

impl Batch {
    pub fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Deterministic "fetch batch indices `[a, b)`" primitive. Data loading,
/// shuffling, and dataset I/O live entirely behind this trait.
pub trait BatchProvider: Send + Sync {
    fn fetch(&self, offset: usize, len: usize) -> Batch;
}

/// The external autodiff engine's interface to the core: given the current
/// parameters and a batch, produce one gradient tensor per trainable layer,
/// in layer order.
pub trait GradientEngine: Send + Sync {
    fn compute(&self, params: &ParameterVector, batch: &Batch) -> Result<Vec<Tensor>>;
}

/// Reference implementations used by the test suite. Never used outside
/// `#[cfg(test)]` or test-only binaries — a real deployment supplies its own
/// autodiff engine and data loader.
pub mod mock {
    use super::*;

    /// Batches are just the requested index window; no shuffling.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct SequentialBatchProvider;

    impl BatchProvider for SequentialBatchProvider {
        fn fetch(&self, offset: usize, len: usize) -> Batch {
            Batch::new(offset, len)
        }
    }

    /// Emits a gradient tensor per trainable layer whose every element is
    /// `seed`, scaled by the batch's starting offset. Deterministic given
    /// `(params shapes, batch, seed)` — enough to test step-parameter
    /// coherence (§8 property 6) without a real autodiff engine.
    pub struct SeededGradientEngine {
        pub seed: f64,
    }

    impl SeededGradientEngine {
        pub fn new(seed: f64) -> Self {
            Self { seed }
        }
    }

    impl GradientEngine for SeededGradientEngine {
        fn compute(&self, params: &ParameterVector, batch: &Batch) -> Result<Vec<Tensor>> {
            let scale = self.seed + batch.start as f64;
            Ok(params
                .trainable_layers()
                .map(|l| {
                    let shape = &params.spec(l).shape;
                    let len: usize = shape.iter().product();
                    Tensor::from_vec(shape, vec![scale; len])
                })
                .collect())
        }
    }

    /// Returns a fixed, pre-supplied gradient list regardless of the batch —
    /// used by scenario tests that assert on exact worker gradient values
    /// (e.g. §8 S1-S4).
    pub struct FixedGradientEngine {
        pub gradients: Vec<Tensor>,
    }

    impl FixedGradientEngine {
        pub fn new(gradients: Vec<Tensor>) -> Self {
            Self { gradients }
        }
    }

    impl GradientEngine for FixedGradientEngine {
        fn compute(&self, _params: &ParameterVector, _batch: &Batch) -> Result<Vec<Tensor>> {
            Ok(self.gradients.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::*;
    use super::*;
    use crate::model::LayerSpec;

    #[test]
    fn sequential_provider_returns_requested_window() {
        let provider = SequentialBatchProvider;
        let batch = provider.fetch(10, 4);
        assert_eq!(batch.start, 10);
        assert_eq!(batch.end(), 14);
    }

    #[test]
    fn seeded_engine_is_deterministic_given_same_batch() {
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let engine = SeededGradientEngine::new(1.0);
        let batch = Batch::new(5, 2);
        let a = engine.compute(&params, &batch).unwrap();
        let b = engine.compute(&params, &batch).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].data, vec![6.0, 6.0]);
    }
}

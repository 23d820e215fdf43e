//! Arithmetic mean aggregator (§4.4). Non-robust: a single corrupted
//! gradient can perturb the result arbitrarily — use `geomedian` or
//! `majority` when up to f workers may be adversarial.

use super::Aggregator;
use crate::accumulator::GradientAccumulator;
use crate::error::Result;
use crate::model::ParameterVector;
use crate::tensor::Tensor;

/// `G[l] = (sum_w A[l][w]) / expected_contributors`. `expected_contributors`
/// is normally `W` but may be configured smaller to tolerate a known number
/// of missing workers without aborting the step.
pub struct MeanAggregator {
    pub expected_contributors: u32,
}

impl MeanAggregator {
    pub fn new(expected_contributors: u32) -> Self {
        Self {
            expected_contributors,
        }
    }
}

impl Aggregator for MeanAggregator {
    fn reduce(
        &self,
        accumulator: &GradientAccumulator,
        params: &ParameterVector,
        layers: &[usize],
    ) -> Result<Vec<Tensor>> {
        let mut out = Vec::with_capacity(layers.len());
        for (pos, &layer) in layers.iter().enumerate() {
            let shape = params.spec(layer).shape.clone();
            let mut sum = Tensor::zeros(&shape);
            for (_rank, tensor) in accumulator.layer_slots(pos) {
                sum.add_assign(tensor);
            }
            sum.scale(1.0 / self.expected_contributors as f64);
            out.push(sum);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerSpec;

    #[test]
    fn mean_of_three_workers_matches_scenario_s1() {
        // §8 S1: W=3, L=1, s0=(2,). Gradients [1,0],[0,1],[1,1].
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut acc = GradientAccumulator::new(1, 3);
        acc.put(0, 1, Tensor::from_vec(&[2], vec![1.0, 0.0]));
        acc.put(0, 2, Tensor::from_vec(&[2], vec![0.0, 1.0]));
        acc.put(0, 3, Tensor::from_vec(&[2], vec![1.0, 1.0]));

        let agg = MeanAggregator::new(3);
        let out = agg.reduce(&acc, &params, &[0]).unwrap();
        assert!((out[0].data[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((out[0].data[1] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn mean_is_independent_of_receive_order() {
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);

        let mut acc_a = GradientAccumulator::new(1, 2);
        acc_a.put(0, 1, Tensor::from_vec(&[1], vec![3.0]));
        acc_a.put(0, 2, Tensor::from_vec(&[1], vec![5.0]));

        let mut acc_b = GradientAccumulator::new(1, 2);
        acc_b.put(0, 2, Tensor::from_vec(&[1], vec![5.0]));
        acc_b.put(0, 1, Tensor::from_vec(&[1], vec![3.0]));

        let agg = MeanAggregator::new(2);
        let a = agg.reduce(&acc_a, &params, &[0]).unwrap();
        let b = agg.reduce(&acc_b, &params, &[0]).unwrap();
        assert_eq!(a, b);
    }
}

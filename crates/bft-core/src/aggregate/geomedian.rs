//! Geometric-median aggregator (§4.5): the Weiszfeld point minimising the
//! sum of Euclidean distances to the worker gradients. Byzantine-robust to
//! up to `floor((W-1)/2)` arbitrary corruptions per layer, unlike the mean.

use super::Aggregator;
use crate::accumulator::GradientAccumulator;
use crate::error::Result;
use crate::model::ParameterVector;
use crate::tensor::Tensor;

/// Weiszfeld iteration with a smoothing term that avoids division by zero
/// when the current iterate coincides with one of the sample points (the
/// "degenerate case" called out by §4.5).
pub struct GeoMedianAggregator {
    pub max_iters: usize,
    pub tol: f64,
    /// Smoothing constant added (in quadrature) to every distance before
    /// inverting it, so a coincident sample contributes a large but finite
    /// weight instead of a division by zero.
    pub smoothing: f64,
}

impl Default for GeoMedianAggregator {
    fn default() -> Self {
        Self {
            max_iters: 200,
            tol: 1e-6,
            smoothing: 1e-12,
        }
    }
}

impl GeoMedianAggregator {
    pub fn new(max_iters: usize, tol: f64) -> Self {
        Self {
            max_iters,
            tol,
            ..Default::default()
        }
    }

    /// Weiszfeld's algorithm over `points`, skipping any point that contains
    /// a non-finite component so a single adversarial NaN gradient cannot
    /// propagate into the result (§8 boundary behaviour: "the adversary
    /// injecting NaN").
    fn weiszfeld(&self, points: &[Vec<f64>]) -> Vec<f64> {
        let dim = points.first().map(|p| p.len()).unwrap_or(0);
        let valid: Vec<&Vec<f64>> = points
            .iter()
            .filter(|p| p.iter().all(|v| v.is_finite()))
            .collect();

        if valid.is_empty() {
            return vec![0.0; dim];
        }

        let mut y = vec![0.0; dim];
        for p in &valid {
            for (acc, v) in y.iter_mut().zip(p.iter()) {
                *acc += v / valid.len() as f64;
            }
        }

        for _ in 0..self.max_iters {
            let mut weight_sum = 0.0;
            let mut weighted = vec![0.0; dim];
            for p in &valid {
                let dist_sq: f64 = y
                    .iter()
                    .zip(p.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                let dist = (dist_sq + self.smoothing * self.smoothing).sqrt();
                let weight = 1.0 / dist;
                weight_sum += weight;
                for (acc, v) in weighted.iter_mut().zip(p.iter()) {
                    *acc += weight * v;
                }
            }
            let y_new: Vec<f64> = weighted.iter().map(|v| v / weight_sum).collect();

            let delta: f64 = y_new
                .iter()
                .zip(y.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            let scale = y_new.iter().map(|v| v * v).sum::<f64>().sqrt().max(1e-12);
            let converged = delta / scale < self.tol;
            y = y_new;
            if converged {
                break;
            }
        }
        y
    }
}

impl Aggregator for GeoMedianAggregator {
    fn reduce(
        &self,
        accumulator: &GradientAccumulator,
        params: &ParameterVector,
        layers: &[usize],
    ) -> Result<Vec<Tensor>> {
        let mut out = Vec::with_capacity(layers.len());
        for (pos, &layer) in layers.iter().enumerate() {
            let shape = params.spec(layer).shape.clone();
            let points: Vec<Vec<f64>> = accumulator
                .layer_slots(pos)
                .map(|(_rank, t)| t.data.clone())
                .collect();
            let median = self.weiszfeld(&points);
            out.push(Tensor::from_vec(&shape, median));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerSpec;

    #[test]
    fn tolerates_two_outliers_of_five_matching_scenario_s2() {
        // §8 S2: W=5, f=2. Gradients [0,0]x3, [1000,1000], [-1000,0].
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut acc = GradientAccumulator::new(1, 5);
        acc.put(0, 1, Tensor::from_vec(&[2], vec![0.0, 0.0]));
        acc.put(0, 2, Tensor::from_vec(&[2], vec![0.0, 0.0]));
        acc.put(0, 3, Tensor::from_vec(&[2], vec![0.0, 0.0]));
        acc.put(0, 4, Tensor::from_vec(&[2], vec![1000.0, 1000.0]));
        acc.put(0, 5, Tensor::from_vec(&[2], vec![-1000.0, 0.0]));

        let agg = GeoMedianAggregator::default();
        let out = agg.reduce(&acc, &params, &[0]).unwrap();
        assert!(out[0].data[0].abs() < 1e-3, "{:?}", out[0].data);
        assert!(out[0].data[1].abs() < 1e-3, "{:?}", out[0].data);
    }

    #[test]
    fn with_no_adversary_all_three_aggregators_agree_with_mean() {
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
        let mut acc = GradientAccumulator::new(1, 3);
        acc.put(0, 1, Tensor::from_vec(&[1], vec![1.0]));
        acc.put(0, 2, Tensor::from_vec(&[1], vec![2.0]));
        acc.put(0, 3, Tensor::from_vec(&[1], vec![3.0]));

        let agg = GeoMedianAggregator::default();
        let out = agg.reduce(&acc, &params, &[0]).unwrap();
        assert!((out[0].data[0] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn nan_gradient_does_not_propagate_into_result() {
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
        let mut acc = GradientAccumulator::new(1, 3);
        acc.put(0, 1, Tensor::from_vec(&[1], vec![1.0]));
        acc.put(0, 2, Tensor::from_vec(&[1], vec![1.2]));
        acc.put(0, 3, Tensor::from_vec(&[1], vec![f64::NAN]));

        let agg = GeoMedianAggregator::default();
        let out = agg.reduce(&acc, &params, &[0]).unwrap();
        assert!(!out[0].has_nan());
    }
}

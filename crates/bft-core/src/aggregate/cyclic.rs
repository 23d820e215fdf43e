//! Cyclic linear-decode aggregator (§4.7). Each worker transmits a linear
//! combination of the gradients of the sub-batches its `W_mask` row
//! selects; the coordinator recovers `sum_b g_b[l]` by finding a
//! combination of received rows whose restriction to `W_enc` sums to the
//! all-ones functional over the B batches, then applies that same
//! combination to the received tensors.
//!
//! The original source's `CodedMaster` never actually implements cyclic
//! decoding (only "normal" and "maj_vote" update modes exist there); this
//! is a from-spec reconstruction of §4.7 and §3's decodability invariant,
//! generalized from the worked example in §8 S4 where `hat_s == B` and the
//! decoding reduces to inverting a square `W_enc` restricted to the chosen
//! workers. See DESIGN.md for the resolved scope of partial-coverage
//! (`hat_s < B`) decoding.

use super::Aggregator;
use crate::accumulator::GradientAccumulator;
use crate::config::EncodingMatrix;
use crate::error::{Error, Result};
use crate::model::ParameterVector;
use crate::tensor::{ComplexTensor, Tensor};

type Complex = (f64, f64);

fn c_add(a: Complex, b: Complex) -> Complex {
    (a.0 + b.0, a.1 + b.1)
}
fn c_sub(a: Complex, b: Complex) -> Complex {
    (a.0 - b.0, a.1 - b.1)
}
fn c_mul(a: Complex, b: Complex) -> Complex {
    (a.0 * b.0 - a.1 * b.1, a.0 * b.1 + a.1 * b.0)
}
fn c_div(a: Complex, b: Complex) -> Complex {
    let denom = b.0 * b.0 + b.1 * b.1;
    ((a.0 * b.0 + a.1 * b.1) / denom, (a.1 * b.0 - a.0 * b.1) / denom)
}
fn c_abs(a: Complex) -> f64 {
    (a.0 * a.0 + a.1 * a.1).sqrt()
}

/// Solves the square system `a * x = b` (both complex) via Gaussian
/// elimination with partial pivoting. Returns `None` if `a` is singular to
/// within `tol`.
fn solve_complex(mut a: Vec<Vec<Complex>>, mut b: Vec<Complex>, tol: f64) -> Option<Vec<Complex>> {
    let n = b.len();
    for col in 0..n {
        let (pivot, pivot_abs) = (col..n)
            .map(|r| (r, c_abs(a[r][col])))
            .max_by(|x, y| x.1.total_cmp(&y.1))?;
        if !pivot_abs.is_finite() || pivot_abs < tol {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let diag = a[col][col];
        for k in col..n {
            a[col][k] = c_div(a[col][k], diag);
        }
        b[col] = c_div(b[col], diag);

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[row][col];
            if c_abs(factor) == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] = c_sub(a[row][k], c_mul(factor, a[col][k]));
            }
            b[row] = c_sub(b[row], c_mul(factor, b[col]));
        }
    }
    Some(b)
}

/// Decoding weights `c` (one per chosen worker) solving `M^T c = ones(B)`,
/// found via the normal equations `(M M^T) c = M * ones(B)` so the method
/// works whether `|subset| == B` (exact, §8 S4) or not (least-squares,
/// rejected below if the residual is not negligible).
fn decoding_weights(rows: &[Vec<Complex>], num_batches: usize, tol: f64) -> Option<Vec<Complex>> {
    let s = rows.len();
    let ones = vec![(1.0, 0.0); num_batches];

    let mut mmt = vec![vec![(0.0, 0.0); s]; s];
    for i in 0..s {
        for j in 0..s {
            let mut acc = (0.0, 0.0);
            for k in 0..num_batches {
                acc = c_add(acc, c_mul(rows[i][k], rows[j][k]));
            }
            mmt[i][j] = acc;
        }
    }
    let mut rhs = vec![(0.0, 0.0); s];
    for i in 0..s {
        let mut acc = (0.0, 0.0);
        for k in 0..num_batches {
            acc = c_add(acc, c_mul(rows[i][k], ones[k]));
        }
        rhs[i] = acc;
    }

    let c = solve_complex(mmt, rhs, tol)?;

    // Residual check: does c^T * M approximate ones(B)?
    let mut max_residual = 0.0_f64;
    for k in 0..num_batches {
        let mut acc = (0.0, 0.0);
        for i in 0..s {
            acc = c_add(acc, c_mul(c[i], rows[i][k]));
        }
        max_residual = max_residual.max(c_abs(c_sub(acc, (1.0, 0.0))));
    }
    if !max_residual.is_finite() || max_residual > 1e-6 {
        return None;
    }
    Some(c)
}

fn combinations(items: &[u32], k: usize) -> Vec<Vec<u32>> {
    if k == 0 {
        return vec![vec![]];
    }
    if items.len() < k {
        return vec![];
    }
    let mut out = Vec::new();
    for i in 0..=(items.len() - k) {
        let rest = combinations(&items[i + 1..], k - 1);
        for mut r in rest {
            r.insert(0, items[i]);
            out.push(r);
        }
    }
    out
}

/// Masked `W_enc` row for `rank`: entries outside `W_mask[rank]`'s support
/// are zero because the worker never computed (and so never summed in)
/// the corresponding sub-batch gradient.
fn masked_row(w_enc: &EncodingMatrix, mask_support: &[bool], rank: u32) -> Vec<Complex> {
    w_enc.rows[(rank - 1) as usize]
        .iter()
        .zip(mask_support.iter())
        .map(|(&coeff, &on)| if on { coeff } else { (0.0, 0.0) })
        .collect()
}

pub struct CyclicDecodeAggregator {
    pub w_enc: EncodingMatrix,
    pub hat_s: usize,
    /// `mask_rows[rank - 1]` is the boolean support row for that worker.
    pub mask_rows: Vec<Vec<bool>>,
    /// Caps the number of worker subsets tried per layer, bounding work for
    /// large `W`; small deployments (and every scenario in §8) never get
    /// close to this limit.
    pub max_subsets_tried: usize,
}

impl CyclicDecodeAggregator {
    pub fn new(w_enc: EncodingMatrix, hat_s: usize, mask_rows: Vec<Vec<bool>>) -> Self {
        Self {
            w_enc,
            hat_s,
            mask_rows,
            max_subsets_tried: 500,
        }
    }

    fn decode_layer(&self, received: &[(u32, &Tensor)], layer: usize) -> Result<Tensor> {
        let num_batches = self.w_enc.num_batches();
        let shape = received[0].1.shape.clone();
        let len = received[0].1.len();

        let ranks: Vec<u32> = received.iter().map(|(r, _)| *r).collect();
        let subset_size = self.hat_s.min(ranks.len());
        let subsets = combinations(&ranks, subset_size);

        let mut candidates: Vec<Vec<f64>> = Vec::new();

        for subset in subsets.iter().take(self.max_subsets_tried) {
            let rows: Vec<Vec<Complex>> = subset
                .iter()
                .map(|&rank| masked_row(&self.w_enc, &self.mask_rows[(rank - 1) as usize], rank))
                .collect();

            let weights = match decoding_weights(&rows, num_batches, 1e-9) {
                Some(w) => w,
                None => continue,
            };

            let mut decoded = ComplexTensor::zeros(&shape);
            for (&rank, &w) in subset.iter().zip(weights.iter()) {
                let tensor = received.iter().find(|(r, _)| *r == rank).unwrap().1;
                decoded.add_scaled(w, tensor);
            }

            match decoded.into_real(1e-6) {
                Some(real) => candidates.push(real.data),
                None => continue,
            }
        }

        if candidates.is_empty() {
            return Err(Error::DecodeFailure { layer });
        }

        // Select the value a majority of valid subsets agree on (within a
        // small numeric tolerance), the "consistent solution" the spec asks
        // for when the adversarial set is not known to the decoder.
        let mut best_idx = 0;
        let mut best_count = 0;
        for (i, candidate) in candidates.iter().enumerate() {
            let count = candidates
                .iter()
                .filter(|other| {
                    let dist_sq: f64 = candidate
                        .iter()
                        .zip(other.iter())
                        .map(|(a, b)| (a - b) * (a - b))
                        .sum();
                    dist_sq.sqrt() < 1e-4 * (1.0 + candidate.iter().map(|v| v.abs()).fold(0.0, f64::max))
                })
                .count();
            if count > best_count {
                best_count = count;
                best_idx = i;
            }
        }

        let mut data = candidates[best_idx].clone();
        let scale = 1.0 / num_batches as f64;
        for v in data.iter_mut() {
            *v *= scale;
        }
        let _ = len;
        Ok(Tensor::from_vec(&shape, data))
    }
}

impl Aggregator for CyclicDecodeAggregator {
    fn reduce(
        &self,
        accumulator: &GradientAccumulator,
        _params: &ParameterVector,
        layers: &[usize],
    ) -> Result<Vec<Tensor>> {
        let mut out = Vec::with_capacity(layers.len());
        for (pos, &layer) in layers.iter().enumerate() {
            let received: Vec<(u32, &Tensor)> = accumulator.layer_slots(pos).collect();
            if received.is_empty() {
                return Err(Error::DecodeFailure { layer });
            }
            out.push(self.decode_layer(&received, layer)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerSpec;

    /// §8 S4: W=3, f=1, hat_s=3, `W_mask = I3 + cyclic(I3)` over B=3
    /// (every row touches all 3 batches), `W_enc` row-stochastic. Honest
    /// combined gradients chosen so the unique per-batch solution is
    /// `[(1,0), (0,1), (1,1)]`; expected decoded mean = `[2/3, 2/3]`.
    #[test]
    fn decodes_scenario_s4() {
        let w_enc = EncodingMatrix {
            rows: vec![
                vec![(1.0, 0.0), (0.0, 0.0), (0.0, 0.0)],
                vec![(0.0, 0.0), (1.0, 0.0), (0.0, 0.0)],
                vec![(0.0, 0.0), (0.0, 0.0), (1.0, 0.0)],
            ],
        };
        let mask_rows = vec![vec![true, true, true]; 3];

        // Worker k transmits exactly g_k (identity encoding): g_0=1, g_1=0,
        // g_2=1 -> sum over all batches per element = 1+0+1=2; per-batch
        // vector values [(1,0),(0,1),(1,1)] are two-element tensors.
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![2])]);
        let mut acc = GradientAccumulator::new(1, 3);
        acc.put(0, 1, Tensor::from_vec(&[2], vec![1.0, 0.0]));
        acc.put(0, 2, Tensor::from_vec(&[2], vec![0.0, 1.0]));
        acc.put(0, 3, Tensor::from_vec(&[2], vec![1.0, 1.0]));

        let agg = CyclicDecodeAggregator::new(w_enc, 3, mask_rows);
        let out = agg.reduce(&acc, &params, &[0]).unwrap();
        assert!((out[0].data[0] - 2.0 / 3.0).abs() < 1e-6, "{:?}", out[0].data);
        assert!((out[0].data[1] - 2.0 / 3.0).abs() < 1e-6, "{:?}", out[0].data);
    }

    #[test]
    fn decode_failure_when_no_consistent_subset_exists() {
        let w_enc = EncodingMatrix {
            rows: vec![
                vec![(0.0, 0.0), (0.0, 0.0)],
                vec![(0.0, 0.0), (0.0, 0.0)],
            ],
        };
        let mask_rows = vec![vec![true, true]; 2];
        let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
        let mut acc = GradientAccumulator::new(1, 2);
        acc.put(0, 1, Tensor::from_vec(&[1], vec![1.0]));
        acc.put(0, 2, Tensor::from_vec(&[1], vec![1.0]));

        let agg = CyclicDecodeAggregator::new(w_enc, 2, mask_rows);
        let err = agg.reduce(&acc, &params, &[0]).unwrap_err();
        assert!(matches!(err, Error::DecodeFailure { layer: 0 }));
    }
}

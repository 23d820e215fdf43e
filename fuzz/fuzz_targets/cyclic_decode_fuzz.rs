#![no_main]

use arbitrary::Arbitrary;
use bft_core::accumulator::GradientAccumulator;
use bft_core::aggregate::cyclic::CyclicDecodeAggregator;
use bft_core::aggregate::Aggregator;
use bft_core::config::EncodingMatrix;
use bft_core::model::{LayerSpec, ParameterVector};
use bft_core::tensor::Tensor;
use libfuzzer_sys::fuzz_target;

/// Arbitrary small `W_enc` coefficients, mask support, and received
/// gradient values for the cyclic decoder -- this is the aggregator with
/// the most numerically delicate code path (Gaussian elimination over
/// complex numbers), so it gets its own dedicated target.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    num_workers: u8,
    num_batches: u8,
    hat_s: u8,
    coeff_bits: Vec<u64>,
    mask_bits: Vec<u8>,
    gradient_bits: Vec<u64>,
}

const MAX_WORKERS: usize = 8;
const MAX_BATCHES: usize = 6;

fuzz_target!(|input: FuzzInput| {
    let num_workers = (input.num_workers as usize % MAX_WORKERS) + 1;
    let num_batches = (input.num_batches as usize % MAX_BATCHES) + 1;
    let hat_s = (input.hat_s as usize % num_batches) + 1;

    let mut rows = Vec::with_capacity(num_workers);
    for w in 0..num_workers {
        let mut row = Vec::with_capacity(num_batches);
        for b in 0..num_batches {
            let idx = (w * num_batches + b) % input.coeff_bits.len().max(1);
            let bits = input.coeff_bits.get(idx).copied().unwrap_or(0);
            row.push((f64::from_bits(bits), 0.0));
        }
        rows.push(row);
    }
    let w_enc = EncodingMatrix { rows };

    let mut mask_rows = Vec::with_capacity(num_workers);
    for w in 0..num_workers {
        let mut row = vec![false; num_batches];
        for slot in row.iter_mut().take(hat_s) {
            *slot = true;
        }
        // Perturb which slots are on using the fuzz input so coverage isn't
        // limited to "always the first hat_s batches".
        let idx = w % input.mask_bits.len().max(1);
        if let Some(&b) = input.mask_bits.get(idx) {
            if (b & 1) == 1 && num_batches > 1 {
                row.swap(0, 1);
            }
        }
        mask_rows.push(row);
    }

    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
    let mut accumulator = GradientAccumulator::new(1, num_workers as u32);
    for w in 0..num_workers {
        let idx = w % input.gradient_bits.len().max(1);
        let bits = input.gradient_bits.get(idx).copied().unwrap_or(0);
        let value = f64::from_bits(bits);
        accumulator.put(0, (w + 1) as u32, Tensor::from_vec(&[1], vec![value]));
    }

    let agg = CyclicDecodeAggregator::new(w_enc, hat_s, mask_rows);
    // Either a decoded (possibly nonsensical, given random coefficients)
    // tensor or a clean `DecodeFailure` -- never a panic, even when the
    // linear system is singular or the inputs are non-finite.
    let _ = agg.reduce(&accumulator, &params, &[0]);
});

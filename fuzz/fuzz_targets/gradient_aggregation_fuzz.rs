#![no_main]

use arbitrary::Arbitrary;
use bft_core::accumulator::GradientAccumulator;
use bft_core::aggregate::geomedian::GeoMedianAggregator;
use bft_core::aggregate::mean::MeanAggregator;
use bft_core::aggregate::Aggregator;
use bft_core::model::{LayerSpec, ParameterVector};
use bft_core::tensor::Tensor;
use libfuzzer_sys::fuzz_target;

/// Per-worker gradient values for a single trainable layer of fixed width.
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    worker_values: Vec<Vec<u64>>,
}

const WIDTH: usize = 4;
const MAX_WORKERS: usize = 24;

fuzz_target!(|input: FuzzInput| {
    let num_workers = input.worker_values.len().min(MAX_WORKERS);
    if num_workers == 0 {
        return;
    }

    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![WIDTH])]);
    let mean_agg = MeanAggregator::new(num_workers as u32);
    let mut accumulator = GradientAccumulator::new(1, num_workers as u32);

    for (i, raw) in input.worker_values.iter().take(num_workers).enumerate() {
        let mut data: Vec<f64> = raw.iter().take(WIDTH).map(|&b| f64::from_bits(b)).collect();
        data.resize(WIDTH, 0.0);
        accumulator.put(0, (i + 1) as u32, Tensor::from_vec(&[WIDTH], data));
    }

    // The mean aggregator must never panic: NaN/inf inputs are allowed to
    // poison the arithmetic result (§8 boundary behaviour for geomedian
    // only promises NaN containment, not the mean), but the reduce call
    // itself must always return.
    let _ = mean_agg.reduce(&accumulator, &params, &[0]);

    // Geometric median must never propagate a NaN into its output even
    // when every input coordinate is adversarially chosen, matching the
    // boundary behaviour in §8.
    let geomedian = GeoMedianAggregator::default();
    if let Ok(out) = geomedian.reduce(&accumulator, &params, &[0]) {
        assert!(!out[0].has_nan(), "geometric median leaked a NaN: {:?}", out[0].data);
    }
});

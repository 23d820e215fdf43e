#![no_main]

use arbitrary::Arbitrary;
use bft_core::accumulator::GradientAccumulator;
use bft_core::aggregate::majority::MajorityVoteAggregator;
use bft_core::aggregate::Aggregator;
use bft_core::model::{LayerSpec, ParameterVector};
use bft_core::tensor::Tensor;
use libfuzzer_sys::fuzz_target;

/// A handful of replication groups, each with arbitrary integer-valued
/// "gradients" (kept to small integers so exact coordinate-wise equality,
/// the majority test's actual comparison, is reachable by chance).
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    group_sizes: Vec<u8>,
    values: Vec<i8>,
}

const MAX_GROUPS: usize = 6;
const MAX_GROUP_SIZE: usize = 7;

fuzz_target!(|input: FuzzInput| {
    let mut groups: Vec<Vec<u32>> = Vec::new();
    let mut next_rank = 1u32;
    for &raw in input.group_sizes.iter().take(MAX_GROUPS) {
        let size = (raw as usize % MAX_GROUP_SIZE) + 1;
        let group: Vec<u32> = (next_rank..next_rank + size as u32).collect();
        next_rank += size as u32;
        groups.push(group);
    }
    if groups.is_empty() {
        return;
    }
    let total_workers = next_rank - 1;

    let params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
    let mut accumulator = GradientAccumulator::new(1, total_workers);

    let mut idx = 0;
    for rank in 1..=total_workers {
        let v = *input.values.get(idx % input.values.len().max(1)).unwrap_or(&0);
        idx += 1;
        accumulator.put(0, rank, Tensor::from_vec(&[1], vec![v as f64]));
    }

    let agg = MajorityVoteAggregator::new(groups);
    // Must never panic: either a clean `NoMajority` error or a finite
    // aggregate tensor, regardless of how the replica values collide.
    if let Ok(out) = agg.reduce(&accumulator, &params, &[0]) {
        assert!(out[0].data[0].is_finite());
    }
});

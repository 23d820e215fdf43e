#![no_main]

use arbitrary::Arbitrary;
use bft_core::config::{ErrMode, EncodingMatrix, Flavour, MaskMatrix, RunConfig, TransportMode, UpdateMode};
use libfuzzer_sys::fuzz_target;

#[derive(Arbitrary, Debug)]
enum FuzzFlavour {
    Baseline(u8),
    Replicated { group_count: u8, group_size: u8 },
    Cyclic { hat_s: u8, num_batches: u8 },
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    num_workers: u8,
    fault_ranks: Vec<u8>,
    flavour: FuzzFlavour,
    learning_rate_bits: u64,
    momentum_bits: u64,
}

fn to_update_mode(tag: u8) -> UpdateMode {
    match tag % 3 {
        0 => UpdateMode::Mean,
        1 => UpdateMode::GeometricMedian,
        _ => UpdateMode::MajorityVote,
    }
}

fuzz_target!(|input: FuzzInput| {
    let num_workers = input.num_workers as u32 % 40 + 1;
    let fault_set: Vec<u32> = input
        .fault_ranks
        .iter()
        .map(|&r| (r as u32 % num_workers) + 1)
        .collect();

    let flavour = match input.flavour {
        FuzzFlavour::Baseline(tag) => Flavour::Baseline {
            update_mode: to_update_mode(tag),
        },
        FuzzFlavour::Replicated { group_count, group_size } => {
            let g = (group_count % 8) as usize + 1;
            let size = (group_size % 6) as usize + 1;
            let groups: Vec<Vec<u32>> = (0..g)
                .map(|gi| ((gi * size + 1) as u32..((gi + 1) * size + 1) as u32).collect())
                .collect();
            Flavour::Replicated {
                group_seeds: vec![0; groups.len()],
                groups,
            }
        }
        FuzzFlavour::Cyclic { hat_s, num_batches } => {
            let batches = (num_batches % 6) as usize + 1;
            let s = (hat_s % batches as u8).max(1) as usize;
            let rows = vec![vec![(1.0, 0.0); batches]; num_workers as usize];
            let mut mask_rows = Vec::with_capacity(num_workers as usize);
            for _ in 0..num_workers {
                let mut row = vec![false; batches];
                for slot in row.iter_mut().take(s) {
                    *slot = true;
                }
                mask_rows.push(row);
            }
            Flavour::Cyclic {
                w_enc: EncodingMatrix { rows },
                w_mask: MaskMatrix { rows: mask_rows },
                hat_s: s,
            }
        }
    };

    let config = RunConfig {
        num_workers,
        fault_set,
        flavour,
        transport_mode: TransportMode::Broadcast,
        compress_grad: false,
        learning_rate: f64::from_bits(input.learning_rate_bits),
        momentum: f64::from_bits(input.momentum_bits),
        max_steps: 1,
        eval_freq: 0,
        timeout_threshold_ms: 1000,
        checkpoint_step: 0,
        err_mode: ErrMode::RevGrad,
        train_dir: "/tmp/fuzz/".into(),
    };

    // validate() must classify every input as Ok or a clean BadConfig --
    // it must never panic regardless of how pathological the topology is.
    let _ = config.validate();
});

//! Typed configuration surface (§6). Flavour selection is a tagged variant
//! evaluated once at startup, not a runtime string key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Coordinator-side reduce rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    Mean,
    GeometricMedian,
    MajorityVote,
}

/// How the coordinator distributes parameters to workers each step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMode {
    /// One collective call per layer.
    Broadcast,
    /// One send per destination, awaited before the next layer.
    PointToPoint,
}

/// Adversarial simulation corruption applied by workers in the fault set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrMode {
    /// Negate every outgoing gradient.
    RevGrad,
    /// Replace every outgoing gradient with a fixed scalar expansion.
    Constant,
    /// Add zero-mean Gaussian noise.
    Random,
    /// Perturb within the cyclic code's null space.
    CyclicCorrupt,
}

/// A dense or complex W x B coefficient matrix for the cyclic flavour,
/// stored row-major: `rows[worker_rank - 1][batch_index]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingMatrix {
    pub rows: Vec<Vec<(f64, f64)>>,
}

impl EncodingMatrix {
    pub fn num_workers(&self) -> usize {
        self.rows.len()
    }

    pub fn num_batches(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }
}

/// The sparse 0/1 batch-selection mask for the cyclic flavour: `rows[rank -
/// 1]` has exactly `hat_s` `true` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskMatrix {
    pub rows: Vec<Vec<bool>>,
}

impl MaskMatrix {
    /// Indices of the sub-batches selected by worker `rank` (1-based).
    pub fn support(&self, rank: u32) -> Vec<usize> {
        self.rows[(rank - 1) as usize]
            .iter()
            .enumerate()
            .filter_map(|(i, &on)| on.then_some(i))
            .collect()
    }
}

/// The three deployment flavours, each carrying exactly the state its batch
/// provider / gradient transformer / reducer need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Flavour {
    Baseline {
        update_mode: UpdateMode,
    },
    Replicated {
        /// Worker ranks partitioned into equal-size groups; group index is
        /// the outer `Vec`.
        groups: Vec<Vec<u32>>,
        /// Per-group deterministic batch seed.
        group_seeds: Vec<u64>,
    },
    Cyclic {
        w_enc: EncodingMatrix,
        w_mask: MaskMatrix,
        hat_s: usize,
    },
}

/// Full run configuration. Constructed once at startup and validated before
/// any step runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub num_workers: u32,
    /// Static adversarial-simulation subset F.
    pub fault_set: Vec<u32>,
    pub flavour: Flavour,
    pub transport_mode: TransportMode,
    pub compress_grad: bool,
    pub learning_rate: f64,
    pub momentum: f64,
    pub max_steps: u64,
    pub eval_freq: u64,
    pub timeout_threshold_ms: u64,
    /// Resume from this step; 0 means cold start.
    pub checkpoint_step: u64,
    pub err_mode: ErrMode,
    pub train_dir: String,
}

impl RunConfig {
    /// Validates the §6 topology/fault-tolerance constraints, raising
    /// `BadConfig` before any step runs.
    pub fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(Error::BadConfig("num_workers must be >= 1".into()));
        }

        match &self.flavour {
            Flavour::Baseline { update_mode } => {
                if *update_mode == UpdateMode::MajorityVote {
                    return Err(Error::BadConfig(
                        "majority-vote update mode requires the replicated flavour's groups".into(),
                    ));
                }
                let f = self.fault_count();
                if f > (self.num_workers as usize - 1) / 2 {
                    return Err(Error::BadConfig(format!(
                        "baseline flavour requires f <= (W-1)/2, got f={f}, W={}",
                        self.num_workers
                    )));
                }
            }
            Flavour::Replicated {
                groups,
                group_seeds,
            } => {
                if groups.is_empty() {
                    return Err(Error::BadConfig("replicated flavour requires at least one group".into()));
                }
                if group_seeds.len() != groups.len() {
                    return Err(Error::BadConfig(
                        "replicated flavour requires one seed per group".into(),
                    ));
                }
                let g = groups[0].len();
                if g == 0 || !groups.iter().all(|group| group.len() == g) {
                    return Err(Error::BadConfig("all replicated groups must share the same size g".into()));
                }
                let total: usize = groups.iter().map(|g| g.len()).sum();
                if total != self.num_workers as usize {
                    return Err(Error::BadConfig(format!(
                        "g*G must equal W: got total membership {total}, W={}",
                        self.num_workers
                    )));
                }
                for group in groups {
                    let f_in_group = group.iter().filter(|r| self.fault_set.contains(r)).count();
                    if f_in_group >= g.div_ceil(2) {
                        return Err(Error::BadConfig(format!(
                            "replicated flavour requires f < g/2 per group, got {f_in_group} of {g}"
                        )));
                    }
                }
            }
            Flavour::Cyclic { w_enc, w_mask, hat_s } => {
                if *hat_s > self.num_workers as usize {
                    return Err(Error::BadConfig(format!(
                        "cyclic flavour requires hat_s <= W, got hat_s={hat_s}, W={}",
                        self.num_workers
                    )));
                }
                let f = self.fault_count();
                if f > (self.num_workers as usize - 1) / 2 {
                    return Err(Error::BadConfig(format!(
                        "cyclic flavour requires f <= (W-1)/2, got f={f}, W={}",
                        self.num_workers
                    )));
                }
                if w_enc.num_workers() != self.num_workers as usize {
                    return Err(Error::BadConfig("w_enc must have one row per worker".into()));
                }
                if w_mask.rows.len() != self.num_workers as usize {
                    return Err(Error::BadConfig("w_mask must have one row per worker".into()));
                }
                for row in &w_mask.rows {
                    let support = row.iter().filter(|&&on| on).count();
                    if support != *hat_s {
                        return Err(Error::BadConfig(format!(
                            "each w_mask row must have exactly hat_s={hat_s} non-zeros, got {support}"
                        )));
                    }
                }
            }
        }

        if self.learning_rate <= 0.0 {
            return Err(Error::BadConfig("learning_rate must be positive".into()));
        }
        Ok(())
    }

    fn fault_count(&self) -> usize {
        self.fault_set.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(flavour: Flavour) -> RunConfig {
        RunConfig {
            num_workers: 5,
            fault_set: vec![],
            flavour,
            transport_mode: TransportMode::Broadcast,
            compress_grad: false,
            learning_rate: 0.1,
            momentum: 0.0,
            max_steps: 10,
            eval_freq: 5,
            timeout_threshold_ms: 5000,
            checkpoint_step: 0,
            err_mode: ErrMode::RevGrad,
            train_dir: "/tmp/train".into(),
        }
    }

    #[test]
    fn baseline_rejects_too_many_adversaries() {
        let mut cfg = base_config(Flavour::Baseline {
            update_mode: UpdateMode::GeometricMedian,
        });
        cfg.fault_set = vec![1, 2, 3];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn baseline_accepts_bounded_adversaries() {
        let mut cfg = base_config(Flavour::Baseline {
            update_mode: UpdateMode::GeometricMedian,
        });
        cfg.fault_set = vec![1, 2];
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn replicated_requires_matching_group_sizes() {
        let cfg = base_config(Flavour::Replicated {
            groups: vec![vec![1, 2], vec![3, 4, 5]],
            group_seeds: vec![1, 2],
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn replicated_requires_total_membership_equal_w() {
        let mut cfg = base_config(Flavour::Replicated {
            groups: vec![vec![1, 2], vec![3, 4]],
            group_seeds: vec![1, 2],
        });
        cfg.num_workers = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn cyclic_requires_hat_s_rows_in_mask() {
        let mut cfg = base_config(Flavour::Cyclic {
            w_enc: EncodingMatrix {
                rows: vec![vec![(1.0, 0.0); 3]; 5],
            },
            w_mask: MaskMatrix {
                rows: vec![vec![true, true, false]; 5],
            },
            hat_s: 3,
        });
        cfg.num_workers = 5;
        assert!(cfg.validate().is_err());
    }
}

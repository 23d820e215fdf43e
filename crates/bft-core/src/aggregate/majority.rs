//! Majority-vote aggregator (§4.6), replicated flavour: within each group,
//! the value held by a strict majority of replicas wins; the final
//! aggregate is the mean of the groups' votes.

use super::Aggregator;
use crate::accumulator::GradientAccumulator;
use crate::error::{Error, Result};
use crate::model::ParameterVector;
use crate::tensor::Tensor;

pub struct MajorityVoteAggregator {
    /// Worker ranks partitioned into equal-size groups.
    pub groups: Vec<Vec<u32>>,
}

impl MajorityVoteAggregator {
    pub fn new(groups: Vec<Vec<u32>>) -> Self {
        Self { groups }
    }

    /// Scans `replicas` (already in ascending worker-rank order) for a value
    /// appearing in strictly more than half the slots, trying candidates in
    /// rank order and resetting the counter between candidates — the
    /// counter is per-candidate, not accumulated across the whole group, so
    /// §9's open question about cross-group accumulation does not arise
    /// here: each call starts fresh.
    fn find_majority(replicas: &[&Tensor]) -> Option<Tensor> {
        let g = replicas.len();
        for candidate in replicas {
            let count = replicas.iter().filter(|t| t.data == candidate.data).count();
            if count * 2 > g {
                return Some((*candidate).clone());
            }
        }
        None
    }
}

impl Aggregator for MajorityVoteAggregator {
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

            for (group_idx, group) in self.groups.iter().enumerate() {
                let mut ranks: Vec<u32> = group.clone();
                ranks.sort_unstable();
                let replicas: Vec<&Tensor> = ranks
                    .iter()
                    .filter_map(|&rank| accumulator.slot(pos, rank))
                    .collect();

                let vote = Self::find_majority(&replicas).ok_or(Error::NoMajority {
                    group: group_idx,
                    layer,
                })?;
                sum.add_assign(&vote);
            }

            sum.scale(1.0 / self.groups.len() as f64);
            out.push(sum);
        }
        Ok(out)
    }
}

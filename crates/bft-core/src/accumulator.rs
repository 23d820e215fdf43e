//! Gradient accumulator A (§4.3): per trainable layer, an array indexed by
//! worker rank holding that worker's most recent gradient, plus a
//! completion counter. Single writer per `(layer, worker)` slot per step —
//! the receive dispatcher — so no cross-worker synchronization is needed.

use crate::tensor::Tensor;

pub struct GradientAccumulator {
    num_workers: u32,
    /// `slots[layer][worker_rank - 1]`
    slots: Vec<Vec<Option<Tensor>>>,
    /// `received[layer]`
    received: Vec<u32>,
}

impl GradientAccumulator {
    pub fn new(num_trainable_layers: usize, num_workers: u32) -> Self {
        Self {
            num_workers,
            slots: vec![vec![None; num_workers as usize]; num_trainable_layers],
            received: vec![0; num_trainable_layers],
        }
    }

    /// Zeros every slot and counter. Must be called before any new receive
    /// is posted for the next step — this ordering is what makes receive
    /// buffer reuse across steps safe.
    pub fn reset(&mut self) {
        for layer_slots in &mut self.slots {
            for slot in layer_slots.iter_mut() {
                *slot = None;
            }
        }
        for count in &mut self.received {
            *count = 0;
        }
    }

    /// Writes `tensor` into slot `(layer, worker)`. `worker` is a 1-based
    /// rank. Does not increment `received` — callers are expected to track
    /// message-count separately if excess deliveries must be tolerated;
    /// here we follow §4.1.3's "hand to aggregator if received <= W" rule by
    /// incrementing unconditionally on `put` and leaving delivery-count
    /// policy to the caller.
    pub fn put(&mut self, layer: usize, worker: u32, tensor: Tensor) {
        self.slots[layer][(worker - 1) as usize] = Some(tensor);
    }

    pub fn increment_received(&mut self, layer: usize) {
        self.received[layer] += 1;
    }

    pub fn received(&self, layer: usize) -> u32 {
        self.received[layer]
    }

    /// True iff `received[l] >= W` for every trainable layer.
    pub fn complete(&self) -> bool {
        self.received.iter().all(|&r| r >= self.num_workers)
    }

    pub fn slot(&self, layer: usize, worker: u32) -> Option<&Tensor> {
        self.slots[layer][(worker - 1) as usize].as_ref()
    }

    /// All filled slots for a layer, in ascending worker-rank order, paired
    /// with their 1-based rank.
    pub fn layer_slots(&self, layer: usize) -> impl Iterator<Item = (u32, &Tensor)> {
        self.slots[layer]
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|t| (i as u32 + 1, t)))
    }

    pub fn num_layers(&self) -> usize {
        self.slots.len()
    }

    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_requires_every_layer_fully_received() {
        let mut acc = GradientAccumulator::new(2, 2);
        acc.put(0, 1, Tensor::zeros(&[1]));
        acc.increment_received(0);
        acc.put(0, 2, Tensor::zeros(&[1]));
        acc.increment_received(0);
        assert!(!acc.complete());

        acc.put(1, 1, Tensor::zeros(&[1]));
        acc.increment_received(1);
        acc.put(1, 2, Tensor::zeros(&[1]));
        acc.increment_received(1);
        assert!(acc.complete());
    }

    #[test]
    fn reset_clears_slots_and_counters() {
        let mut acc = GradientAccumulator::new(1, 1);
        acc.put(0, 1, Tensor::zeros(&[1]));
        acc.increment_received(0);
        acc.reset();
        assert_eq!(acc.received(0), 0);
        assert!(acc.slot(0, 1).is_none());
    }

    #[test]
    fn layer_slots_iterates_in_ascending_rank_order() {
        let mut acc = GradientAccumulator::new(1, 3);
        acc.put(0, 3, Tensor::from_vec(&[1], vec![3.0]));
        acc.put(0, 1, Tensor::from_vec(&[1], vec![1.0]));
        acc.put(0, 2, Tensor::from_vec(&[1], vec![2.0]));
        let ranks: Vec<u32> = acc.layer_slots(0).map(|(r, _)| r).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }
}

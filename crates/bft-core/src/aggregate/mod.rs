//! Aggregation strategies (§4.4-4.7). Each is a pure function over the
//! gradient accumulator producing one tensor per trainable layer — the
//! reducer half of the protocol skeleton described in §9.

pub mod cyclic;
pub mod geomedian;
pub mod majority;
pub mod mean;

use crate::accumulator::GradientAccumulator;
use crate::error::Result;
use crate::model::ParameterVector;
use crate::tensor::Tensor;

/// A pluggable reduce rule. `layers` is the ordered set of trainable layer
/// indices the accumulator was built over.
pub trait Aggregator: Send + Sync {
    fn reduce(
        &self,
        accumulator: &GradientAccumulator,
        params: &ParameterVector,
        layers: &[usize],
    ) -> Result<Vec<Tensor>>;
}

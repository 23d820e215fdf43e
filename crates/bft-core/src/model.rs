//! The parameter vector P: an ordered sequence of layers, some trainable,
//! some frozen (BatchNorm-style running statistics).

use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Static description of one layer: its name, shape, and whether it
/// participates in gradient exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub trainable: bool,
}

impl LayerSpec {
    pub fn trainable(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            trainable: true,
        }
    }

    pub fn frozen(name: impl Into<String>, shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            shape,
            trainable: false,
        }
    }
}

/// The full parameter vector: layer specs plus their current values, in a
/// fixed build-time order identical on every node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterVector {
    specs: Vec<LayerSpec>,
    values: Vec<Tensor>,
}

impl ParameterVector {
    pub fn new(specs: Vec<LayerSpec>) -> Self {
        let values = specs.iter().map(|s| Tensor::zeros(&s.shape)).collect();
        Self { specs, values }
    }

    pub fn num_layers(&self) -> usize {
        self.specs.len()
    }

    pub fn num_trainable(&self) -> usize {
        self.specs.iter().filter(|s| s.trainable).count()
    }

    pub fn spec(&self, layer: usize) -> &LayerSpec {
        &self.specs[layer]
    }

    pub fn value(&self, layer: usize) -> &Tensor {
        &self.values[layer]
    }

    pub fn value_mut(&mut self, layer: usize) -> &mut Tensor {
        &mut self.values[layer]
    }

    pub fn set_value(&mut self, layer: usize, tensor: Tensor) {
        self.values[layer] = tensor;
    }

    /// Indices of layers (in the fixed layer order) that take part in
    /// gradient exchange.
    pub fn trainable_layers(&self) -> impl DoubleEndedIterator<Item = usize> + '_ {
        (0..self.specs.len()).filter(|&l| self.specs[l].trainable)
    }

    /// Indices of all layers, trainable and frozen — used when persisting a
    /// checkpoint.
    pub fn all_layers(&self) -> impl Iterator<Item = usize> {
        0..self.specs.len()
    }

    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    pub fn values(&self) -> &[Tensor] {
        &self.values
    }
}

//! Dense tensor representation used for parameters and gradients.
//!
//! The core never depends on a tensor math library: layers are flat `f64`
//! buffers with an explicit shape, matching the wire format in which no
//! shape is ever transmitted (both sides already know it from the layer
//! index).

use serde::{Deserialize, Serialize};

/// A dense, real-valued tensor: a flat row-major buffer plus its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; len],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Self {
        Self {
            shape: shape.to_vec(),
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True iff `shape` equals the expected shape for this layer.
    pub fn shape_matches(&self, expected: &[usize]) -> bool {
        self.shape == expected
    }

    pub fn add_assign(&mut self, other: &Tensor) {
        debug_assert_eq!(self.shape, other.shape);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            *v *= factor;
        }
    }

    pub fn scaled(&self, factor: f64) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|v| v * factor).collect(),
        }
    }

    pub fn sub(&self, other: &Tensor) -> Tensor {
        debug_assert_eq!(self.shape, other.shape);
        Tensor {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(a, b)| a - b)
                .collect(),
        }
    }

    /// Euclidean (L2) norm of the flattened tensor.
    pub fn norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

/// A complex-valued tensor. Used only by the cyclic aggregator's internal
/// accumulator arithmetic (see §9 design note on complex accumulators).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexTensor {
    pub shape: Vec<usize>,
    pub data: Vec<(f64, f64)>,
}

impl ComplexTensor {
    pub fn zeros(shape: &[usize]) -> Self {
        let len = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![(0.0, 0.0); len],
        }
    }

    pub fn from_real(tensor: &Tensor) -> Self {
        Self {
            shape: tensor.shape.clone(),
            data: tensor.data.iter().map(|v| (*v, 0.0)).collect(),
        }
    }

    /// `self += coeff * other`, complex scalar-tensor multiply-accumulate.
    pub fn add_scaled(&mut self, coeff: (f64, f64), other: &Tensor) {
        debug_assert_eq!(self.shape, other.shape);
        for (acc, v) in self.data.iter_mut().zip(other.data.iter()) {
            let (cr, ci) = coeff;
            acc.0 += cr * v;
            acc.1 += ci * v;
        }
    }

    pub fn scale(&mut self, factor: f64) {
        for v in self.data.iter_mut() {
            v.0 *= factor;
            v.1 *= factor;
        }
    }

    /// Drops the imaginary part unconditionally. Used on the sending side
    /// of the cyclic flavour, where the wire format carries only real
    /// `f64` arrays (§6) regardless of whether `W_enc` is complex.
    pub fn into_real_lossy(self) -> Tensor {
        Tensor {
            shape: self.shape,
            data: self.data.into_iter().map(|(re, _)| re).collect(),
        }
    }

    /// Returns the real tensor if every component's imaginary part is
    /// negligible relative to its real part, otherwise `None`.
    pub fn into_real(self, tol: f64) -> Option<Tensor> {
        let mut data = Vec::with_capacity(self.data.len());
        for (re, im) in &self.data {
            if im.abs() > tol * re.abs().max(1.0) {
                return None;
            }
            data.push(*re);
        }
        Some(Tensor {
            shape: self.shape,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_has_expected_length() {
        let t = Tensor::zeros(&[2, 3]);
        assert_eq!(t.len(), 6);
        assert!(t.data.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn add_assign_sums_elementwise() {
        let mut a = Tensor::from_vec(&[2], vec![1.0, 2.0]);
        let b = Tensor::from_vec(&[2], vec![3.0, 4.0]);
        a.add_assign(&b);
        assert_eq!(a.data, vec![4.0, 6.0]);
    }

    #[test]
    fn complex_round_trip_when_imaginary_negligible() {
        let real = Tensor::from_vec(&[2], vec![1.0, 2.0]);
        let complex = ComplexTensor::from_real(&real);
        let back = complex.into_real(1e-9).expect("should be real");
        assert_eq!(back, real);
    }

    #[test]
    fn complex_rejects_significant_imaginary_part() {
        let mut complex = ComplexTensor::zeros(&[1]);
        complex.data[0] = (1.0, 0.5);
        assert!(complex.into_real(1e-9).is_none());
    }
}

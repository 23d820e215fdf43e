#![no_main]

use arbitrary::Arbitrary;
use bft_core::codec::{Codec, IdentityCodec, Int8Codec};
use bft_core::tensor::Tensor;
use libfuzzer_sys::fuzz_target;

/// Arbitrary tensor: shape is kept small to keep each run fast, values are
/// any `f64` bit pattern (including NaN/inf) so the codecs see the same
/// adversarial inputs §8's NaN boundary behaviour exercises by hand.
#[derive(Arbitrary, Debug)]
struct FuzzTensor {
    dims: Vec<u8>,
    raw_bits: Vec<u64>,
}

fn build_tensor(input: &FuzzTensor) -> Option<Tensor> {
    let shape: Vec<usize> = input.dims.iter().take(3).map(|&d| (d % 8) as usize + 1).collect();
    if shape.is_empty() {
        return None;
    }
    let len: usize = shape.iter().product();
    if input.raw_bits.len() < len {
        return None;
    }
    let data: Vec<f64> = input.raw_bits[..len].iter().map(|&b| f64::from_bits(b)).collect();
    Some(Tensor::from_vec(&shape, data))
}

fuzz_target!(|input: FuzzTensor| {
    let Some(tensor) = build_tensor(&input) else {
        return;
    };

    // IdentityCodec must round-trip every finite or non-finite f64 exactly
    // -- the wire format is just a little-endian double array (§6).
    let identity = IdentityCodec;
    let bytes = identity.encode(&tensor);
    if let Ok(back) = identity.decode(&bytes, &tensor.shape) {
        for (a, b) in tensor.data.iter().zip(back.data.iter()) {
            assert!(a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan()));
        }
    } else {
        panic!("identity codec failed to decode its own encoding");
    }

    // Int8Codec is lossy; it must never panic on any input, finite or not,
    // and must always produce a tensor of the right shape.
    let int8 = Int8Codec;
    let bytes = int8.encode(&tensor);
    if let Ok(back) = int8.decode(&bytes, &tensor.shape) {
        assert_eq!(back.shape, tensor.shape);
    }
});

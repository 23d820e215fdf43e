//! Wire codec: `encode(tensor) -> bytes` / `decode(bytes) -> tensor`. The
//! codec is a single capability injected at construction (§9 redesign flag)
//! rather than an ad-hoc toggle threaded through every send.

use crate::error::{Error, Result};
use crate::tensor::Tensor;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// A symmetric encode/decode pair. Implementations must be deterministic and
/// configured identically on every rank.
pub trait Codec: Send + Sync {
    fn encode(&self, tensor: &Tensor) -> Vec<u8>;
    fn decode(&self, bytes: &[u8], shape: &[usize]) -> Result<Tensor>;
}

/// The uncompressed wire format: a contiguous little-endian IEEE-754 double
/// array. The shape is never transmitted — both sides already know it from
/// the layer index.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityCodec;

impl Codec for IdentityCodec {
    fn encode(&self, tensor: &Tensor) -> Vec<u8> {
        let mut buf = Vec::with_capacity(tensor.data.len() * 8);
        for v in &tensor.data {
            buf.write_f64::<LittleEndian>(*v).expect("write to Vec cannot fail");
        }
        buf
    }

    fn decode(&self, bytes: &[u8], shape: &[usize]) -> Result<Tensor> {
        let expected_len: usize = shape.iter().product();
        if bytes.len() != expected_len * 8 {
            return Err(Error::BadConfig(format!(
                "identity codec: expected {} bytes for shape {shape:?}, got {}",
                expected_len * 8,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let mut data = Vec::with_capacity(expected_len);
        for _ in 0..expected_len {
            data.push(cursor.read_f64::<LittleEndian>()?);
        }
        Ok(Tensor::from_vec(shape, data))
    }
}

/// Lossy symmetric int8 quantization, adapted from the teacher's block
/// quantizer: stores a per-tensor scale/zero-point header followed by one
/// signed byte per element.
#[derive(Debug, Clone, Copy)]
pub struct Int8Codec;

impl Codec for Int8Codec {
    fn encode(&self, tensor: &Tensor) -> Vec<u8> {
        let max_abs = tensor.data.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let scale = if max_abs == 0.0 { 1.0 } else { max_abs / 127.0 };

        let mut buf = Vec::with_capacity(8 + tensor.data.len());
        buf.write_f64::<LittleEndian>(scale).expect("write to Vec cannot fail");
        for v in &tensor.data {
            let q = (v / scale).round().clamp(-127.0, 127.0) as i8;
            buf.push(q as u8);
        }
        buf
    }

    fn decode(&self, bytes: &[u8], shape: &[usize]) -> Result<Tensor> {
        let expected_len: usize = shape.iter().product();
        if bytes.len() != 8 + expected_len {
            return Err(Error::BadConfig(format!(
                "int8 codec: expected {} bytes for shape {shape:?}, got {}",
                8 + expected_len,
                bytes.len()
            )));
        }
        let mut cursor = Cursor::new(&bytes[..8]);
        let scale = cursor.read_f64::<LittleEndian>()?;
        let data = bytes[8..].iter().map(|&b| (b as i8) as f64 * scale).collect();
        Ok(Tensor::from_vec(shape, data))
    }
}

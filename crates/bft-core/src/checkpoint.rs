//! Persisted checkpoint: an opaque blob containing the full parameter state
//! (trainable and frozen). The checkpoint file format itself is out of
//! scope (§1) — this module only needs to be symmetric with itself, not
//! compatible with any external format. Filename pattern carried verbatim
//! from the original source: `<train_dir>/model_step_<t>` (direct string
//! concatenation, no separator normalization, no extension).

use crate::error::{Error, Result};
use crate::model::ParameterVector;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointBlob {
    pub step: u64,
    pub parameters: ParameterVector,
    /// Hex-encoded SHA-256 over `step` and every trainable/frozen layer's
    /// name, shape, and values, taken at save time. `load` recomputes and
    /// compares it so a truncated or hand-edited checkpoint file is
    /// rejected instead of silently resumed from.
    pub integrity: String,
}

/// `<train_dir>/model_step_<t>`, matching the original Python's
/// `self._train_dir+"model_step_"+str(self.cur_step)` exactly.
pub fn checkpoint_path(train_dir: &str, step: u64) -> PathBuf {
    PathBuf::from(format!("{train_dir}model_step_{step}"))
}

fn compute_integrity(step: u64, parameters: &ParameterVector) -> String {
    let mut hasher = Sha256::new();
    hasher.update(step.to_le_bytes());
    for spec in parameters.specs() {
        hasher.update(spec.name.as_bytes());
        for &dim in &spec.shape {
            hasher.update((dim as u64).to_le_bytes());
        }
    }
    for value in parameters.values() {
        for &x in &value.data {
            hasher.update(x.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

pub fn save(train_dir: &str, step: u64, parameters: &ParameterVector) -> Result<PathBuf> {
    let integrity = compute_integrity(step, parameters);
    let blob = CheckpointBlob {
        step,
        parameters: parameters.clone(),
        integrity,
    };
    let path = checkpoint_path(train_dir, step);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let bytes = bincode::serialize(&blob)?;
    std::fs::write(&path, bytes)?;
    Ok(path)
}

pub fn load(path: impl AsRef<Path>) -> Result<CheckpointBlob> {
    let bytes = std::fs::read(path)?;
    let blob: CheckpointBlob = bincode::deserialize(&bytes)?;
    let expected = compute_integrity(blob.step, &blob.parameters);
    if expected != blob.integrity {
        return Err(Error::Other(anyhow::anyhow!(
            "checkpoint integrity mismatch: expected {expected}, found {}",
            blob.integrity
        )));
    }
    Ok(blob)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LayerSpec;

    #[test]
    fn checkpoint_path_matches_concatenation_convention() {
        let path = checkpoint_path("/tmp/train/", 7);
        assert_eq!(path, PathBuf::from("/tmp/train/model_step_7"));
    }

    #[test]
    fn save_and_load_round_trips_bit_identically() {
        let dir = tempfile::tempdir().unwrap();
        let train_dir = format!("{}/", dir.path().display());
        let mut params = ParameterVector::new(vec![
            LayerSpec::trainable("w", vec![2]),
            LayerSpec::frozen("bn.running_mean", vec![2]),
        ]);
        params.set_value(0, crate::tensor::Tensor::from_vec(&[2], vec![1.5, -2.5]));
        params.set_value(1, crate::tensor::Tensor::from_vec(&[2], vec![0.1, 0.2]));

        save(&train_dir, 5, &params).unwrap();
        let loaded = load(checkpoint_path(&train_dir, 5)).unwrap();

        assert_eq!(loaded.step, 5);
        assert_eq!(loaded.parameters.value(0), params.value(0));
        assert_eq!(loaded.parameters.value(1), params.value(1));
    }

    #[test]
    fn load_rejects_a_tampered_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let train_dir = format!("{}/", dir.path().display());
        let mut params = ParameterVector::new(vec![LayerSpec::trainable("w", vec![1])]);
        params.set_value(0, crate::tensor::Tensor::from_vec(&[1], vec![1.0]));
        let path = save(&train_dir, 1, &params).unwrap();

        let mut blob = load(&path).unwrap();
        blob.parameters
            .set_value(0, crate::tensor::Tensor::from_vec(&[1], vec![99.0]));
        let tampered = bincode::serialize(&blob).unwrap();
        std::fs::write(&path, tampered).unwrap();

        assert!(load(&path).is_err());
    }
}

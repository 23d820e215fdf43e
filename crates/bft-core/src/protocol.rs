//! Message tags. Tags are computed from `(kind, layer_index)`, not pulled
//! from a pre-sized lookup table, so the tag space scales with L without a
//! global module-level constant list.

/// Tag carrying the coordinator's step counter.
pub const STEP_TAG: u32 = 10;

/// First tag in the parameter-broadcast range.
pub const PARAM_TAG_BASE: u32 = 11;

/// First tag in the gradient-collection range.
pub const GRAD_TAG_BASE: u32 = 88;

pub fn param_tag(layer: usize) -> u32 {
    PARAM_TAG_BASE + layer as u32
}

pub fn grad_tag(layer: usize) -> u32 {
    GRAD_TAG_BASE + layer as u32
}

/// Returns `Err` if the parameter and gradient tag ranges would overlap for
/// `num_layers` layers — a startup invariant, not a runtime check.
pub fn validate_tag_ranges(num_layers: usize) -> Result<(), String> {
    if num_layers == 0 {
        return Ok(());
    }
    let param_hi = PARAM_TAG_BASE + num_layers as u32 - 1;
    if param_hi >= GRAD_TAG_BASE {
        return Err(format!(
            "PARAM_TAG range [{PARAM_TAG_BASE}, {param_hi}] overlaps GRAD_TAG base {GRAD_TAG_BASE} for {num_layers} layers"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_distinct_per_layer() {
        assert_eq!(param_tag(0), 11);
        assert_eq!(param_tag(3), 14);
        assert_eq!(grad_tag(0), 88);
        assert_eq!(grad_tag(3), 91);
    }

    #[test]
    fn validate_tag_ranges_rejects_overlap() {
        // GRAD_TAG_BASE - PARAM_TAG_BASE = 77, so 78 layers overlap.
        assert!(validate_tag_ranges(77).is_ok());
        assert!(validate_tag_ranges(78).is_err());
    }
}

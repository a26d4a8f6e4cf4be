//! Object id extraction and removal.

use crate::data::{LabelMask, BACKGROUND};
use std::collections::BTreeSet;

/// Distinct object ids in a mask, background excluded.
pub fn unique_ids(mask: &LabelMask) -> BTreeSet<u32> {
    mask.data()
        .iter()
        .copied()
        .filter(|&label| label != BACKGROUND)
        .collect()
}

/// Return a copy of `mask` with every pixel labelled with one of `ids` set to
/// background. All other pixels are unchanged.
pub fn zero_ids(mask: &LabelMask, ids: &BTreeSet<u32>) -> LabelMask {
    if ids.is_empty() {
        return mask.clone();
    }
    mask.map_labels(|label| if ids.contains(&label) { BACKGROUND } else { label })
}

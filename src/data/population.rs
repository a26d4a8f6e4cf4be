//! Per-object pixel counts for a label mask.

use crate::data::label_mask::{LabelMask, BACKGROUND};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mapping from object id to its pixel count within one mask.
///
/// Background is never included. Iteration is in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectPopulation {
    counts: BTreeMap<u32, u64>,
}

impl ObjectPopulation {
    /// Count pixels per object in a mask.
    pub fn from_mask(mask: &LabelMask) -> Self {
        let counts = match mask.data().as_slice_memory_order() {
            Some(values) => values
                .par_chunks(64 * 1024)
                .fold(BTreeMap::new, |mut acc, chunk| {
                    for &label in chunk {
                        if label != BACKGROUND {
                            *acc.entry(label).or_insert(0u64) += 1;
                        }
                    }
                    acc
                })
                .reduce(BTreeMap::new, merge_counts),
            None => {
                let mut acc = BTreeMap::new();
                for &label in mask.data().iter() {
                    if label != BACKGROUND {
                        *acc.entry(label).or_insert(0u64) += 1;
                    }
                }
                acc
            }
        };
        Self { counts }
    }

    /// Build directly from (id, count) pairs. Background entries are dropped.
    pub fn from_counts<I: IntoIterator<Item = (u32, u64)>>(pairs: I) -> Self {
        Self {
            counts: pairs
                .into_iter()
                .filter(|(id, _)| *id != BACKGROUND)
                .collect(),
        }
    }

    /// Multiply every count by `factor`.
    ///
    /// Used to express counts measured on a downsampled mask in the units of
    /// the full-resolution mask.
    pub fn scaled(&self, factor: u64) -> Self {
        Self {
            counts: self
                .counts
                .iter()
                .map(|(&id, &count)| (id, count * factor))
                .collect(),
        }
    }

    /// Number of objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True when the mask held no objects.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Pixel count of one object.
    #[inline]
    pub fn get(&self, id: u32) -> Option<u64> {
        self.counts.get(&id).copied()
    }

    /// True when the object is present.
    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.counts.contains_key(&id)
    }

    /// Object ids in ascending order.
    pub fn ids(&self) -> BTreeSet<u32> {
        self.counts.keys().copied().collect()
    }

    /// Pixel counts in ascending id order.
    pub fn counts(&self) -> Vec<u64> {
        self.counts.values().copied().collect()
    }

    /// Iterate (id, count) pairs in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.counts.iter().map(|(&id, &count)| (id, count))
    }

    /// Ids whose pixel count is strictly below `threshold`.
    pub fn ids_below(&self, threshold: f64) -> BTreeSet<u32> {
        self.iter()
            .filter(|&(_, count)| (count as f64) < threshold)
            .map(|(id, _)| id)
            .collect()
    }

    /// Ids whose pixel count is strictly above `threshold`.
    pub fn ids_above(&self, threshold: f64) -> BTreeSet<u32> {
        self.iter()
            .filter(|&(_, count)| (count as f64) > threshold)
            .map(|(id, _)| id)
            .collect()
    }
}

fn merge_counts(mut a: BTreeMap<u32, u64>, b: BTreeMap<u32, u64>) -> BTreeMap<u32, u64> {
    for (id, count) in b {
        *a.entry(id).or_insert(0) += count;
    }
    a
}

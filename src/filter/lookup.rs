//! Nucleus to cytosol identity matching.
//!
//! Matching is a sequence of pure stages over a nucleus/cytosol mask pair.
//! Each stage takes the previous stage's output and returns new values, so
//! the discard sets are never mutated in place:
//!
//! 1. [`collect_footprints`]: the cytosol labels under every nucleus
//! 2. [`match_nuclei`]: pick a cytosol per nucleus or discard the nucleus
//! 3. [`count_cytosol_occurrences`]: how many nuclei claimed each cytosol
//! 4. [`find_orphan_cytosols`]: cytosols no nucleus claimed
//! 5. [`find_multinucleated`]: cytosols claimed more than once
//! 6. [`cleanup_lookup`]: drop pairs touching either discard set
//!
//! [`build_lookup`] runs all of them. The surviving lookup table is a
//! bijection between nucleus and cytosol ids.

use crate::data::{LabelMask, BACKGROUND};
use crate::error::Result;
use crate::mask::unique_ids;
use ndarray::Zip;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Nucleus id to cytosol id.
pub type LookupTable = BTreeMap<u32, u32>;

/// Cytosol labels found under one nucleus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    counts: BTreeMap<u32, u64>,
    total: u64,
}

impl Footprint {
    fn add(&mut self, label: u32) {
        *self.counts.entry(label).or_insert(0) += 1;
        self.total += 1;
    }

    /// Number of nucleus pixels.
    pub fn area(&self) -> u64 {
        self.total
    }

    /// True when any nucleus pixel lies on cytosol background.
    pub fn touches_background(&self) -> bool {
        self.counts.contains_key(&BACKGROUND)
    }

    /// Share of nucleus pixels covered by `label`.
    pub fn fraction(&self, label: u32) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.counts.get(&label).copied().unwrap_or(0) as f64 / self.total as f64
    }

    /// (label, fraction) pairs in ascending label order.
    pub fn fractions(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.counts
            .iter()
            .map(move |(&label, &count)| (label, count as f64 / self.total as f64))
    }
}

/// Outcome of matching a single nucleus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// Nucleus lies within this cytosol.
    Matched(u32),
    /// Part of the nucleus lies outside any cytosol.
    TouchesBackground,
    /// No single cytosol covers enough of the nucleus.
    BelowThreshold,
}

/// Output of [`match_nuclei`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitialMatch {
    pub lookup: LookupTable,
    pub discard: BTreeSet<u32>,
    pub touching_background: usize,
    pub below_threshold: usize,
}

/// Tallies from one matching run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub n_nuclei: usize,
    pub n_cytosols: usize,
    pub touching_background: usize,
    pub below_threshold: usize,
    pub orphan_cytosols: usize,
    pub multinucleated_cytosols: usize,
    /// Pairs that vanished when the downsampled result was upscaled.
    pub lost_after_upscaling: usize,
    pub matched_pairs: usize,
}

impl std::fmt::Display for MatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Match Statistics")?;
        writeln!(f, "  Nuclei:              {}", self.n_nuclei)?;
        writeln!(f, "  Cytosols:            {}", self.n_cytosols)?;
        writeln!(f, "  Touching background: {}", self.touching_background)?;
        writeln!(f, "  Below threshold:     {}", self.below_threshold)?;
        writeln!(f, "  Orphan cytosols:     {}", self.orphan_cytosols)?;
        writeln!(f, "  Multinucleated:      {}", self.multinucleated_cytosols)?;
        writeln!(f, "  Lost on upscaling:   {}", self.lost_after_upscaling)?;
        writeln!(f, "  Matched pairs:       {}", self.matched_pairs)?;
        Ok(())
    }
}

/// Result of the full stage sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupOutcome {
    pub lookup: LookupTable,
    pub nuclei_discard: BTreeSet<u32>,
    pub cytosol_discard: BTreeSet<u32>,
    pub stats: MatchStats,
}

/// Cytosol labels under every nucleus, keyed by nucleus id.
pub fn collect_footprints(
    nucleus: &LabelMask,
    cytosol: &LabelMask,
) -> Result<BTreeMap<u32, Footprint>> {
    nucleus.ensure_same_shape(cytosol)?;

    let mut footprints: BTreeMap<u32, Footprint> = BTreeMap::new();
    Zip::from(nucleus.data())
        .and(cytosol.data())
        .for_each(|&n, &c| {
            if n != BACKGROUND {
                footprints.entry(n).or_default().add(c);
            }
        });
    Ok(footprints)
}

/// Match one nucleus against the cytosol labels it covers.
///
/// The nucleus is rejected if any of its pixels lies on background.
/// Otherwise the lowest cytosol id covering at least `threshold` of the
/// nucleus wins.
pub fn match_footprint(footprint: &Footprint, threshold: f64) -> MatchOutcome {
    if footprint.touches_background() {
        return MatchOutcome::TouchesBackground;
    }
    match footprint.fractions().find(|&(_, fraction)| fraction >= threshold) {
        Some((BACKGROUND, _)) => MatchOutcome::TouchesBackground,
        Some((label, _)) => MatchOutcome::Matched(label),
        None => MatchOutcome::BelowThreshold,
    }
}

/// Initial lookup table and nucleus discard set.
pub fn match_nuclei(footprints: &BTreeMap<u32, Footprint>, threshold: f64) -> InitialMatch {
    let outcomes: Vec<(u32, MatchOutcome)> = footprints
        .par_iter()
        .map(|(&id, footprint)| (id, match_footprint(footprint, threshold)))
        .collect();

    let mut result = InitialMatch::default();
    for (id, outcome) in outcomes {
        match outcome {
            MatchOutcome::Matched(cytosol) => {
                result.lookup.insert(id, cytosol);
            }
            MatchOutcome::TouchesBackground => {
                result.touching_background += 1;
                result.discard.insert(id);
            }
            MatchOutcome::BelowThreshold => {
                result.below_threshold += 1;
                result.discard.insert(id);
            }
        }
    }
    result
}

/// Number of nuclei matched to each cytosol id.
pub fn count_cytosol_occurrences(lookup: &LookupTable) -> BTreeMap<u32, usize> {
    let mut occurrences = BTreeMap::new();
    for &cytosol in lookup.values() {
        *occurrences.entry(cytosol).or_insert(0) += 1;
    }
    occurrences
}

/// Cytosol ids that no nucleus was matched to.
pub fn find_orphan_cytosols(cytosol_ids: &BTreeSet<u32>, lookup: &LookupTable) -> BTreeSet<u32> {
    let claimed: BTreeSet<u32> = lookup.values().copied().collect();
    cytosol_ids.difference(&claimed).copied().collect()
}

/// Nuclei and cytosols of cells with more than one nucleus.
///
/// Returns `(nuclei, cytosols)`; every nucleus sharing a cytosol is included.
pub fn find_multinucleated(
    lookup: &LookupTable,
    occurrences: &BTreeMap<u32, usize>,
) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let mut nuclei = BTreeSet::new();
    let mut cytosols = BTreeSet::new();
    for (&nucleus, &cytosol) in lookup {
        if occurrences.get(&cytosol).copied().unwrap_or(0) > 1 {
            nuclei.insert(nucleus);
            cytosols.insert(cytosol);
        }
    }
    (nuclei, cytosols)
}

/// Lookup table without pairs whose nucleus or cytosol is discarded.
pub fn cleanup_lookup(
    lookup: &LookupTable,
    nuclei_discard: &BTreeSet<u32>,
    cytosol_discard: &BTreeSet<u32>,
) -> LookupTable {
    lookup
        .iter()
        .filter(|(n, c)| !nuclei_discard.contains(n) && !cytosol_discard.contains(c))
        .map(|(&n, &c)| (n, c))
        .collect()
}

/// Run every stage on a nucleus/cytosol pair.
pub fn build_lookup(
    nucleus: &LabelMask,
    cytosol: &LabelMask,
    overlap_threshold: f64,
) -> Result<LookupOutcome> {
    let footprints = collect_footprints(nucleus, cytosol)?;
    let cytosol_ids = unique_ids(cytosol);

    let initial = match_nuclei(&footprints, overlap_threshold);
    let occurrences = count_cytosol_occurrences(&initial.lookup);
    let orphans = find_orphan_cytosols(&cytosol_ids, &initial.lookup);
    let (multi_nuclei, multi_cytosols) = find_multinucleated(&initial.lookup, &occurrences);

    let nuclei_discard: BTreeSet<u32> = initial.discard.union(&multi_nuclei).copied().collect();
    let cytosol_discard: BTreeSet<u32> = orphans.union(&multi_cytosols).copied().collect();
    let lookup = cleanup_lookup(&initial.lookup, &nuclei_discard, &cytosol_discard);

    let stats = MatchStats {
        n_nuclei: footprints.len(),
        n_cytosols: cytosol_ids.len(),
        touching_background: initial.touching_background,
        below_threshold: initial.below_threshold,
        orphan_cytosols: orphans.len(),
        multinucleated_cytosols: multi_cytosols.len(),
        lost_after_upscaling: 0,
        matched_pairs: lookup.len(),
    };

    Ok(LookupOutcome {
        lookup,
        nuclei_discard,
        cytosol_discard,
        stats,
    })
}

/// Remove discarded cytosols and relabel the rest with their nucleus id.
///
/// Relabelling reads each pixel's original label, so a pixel is rewritten at
/// most once even when nucleus and cytosol ids overlap.
pub fn rewrite_cytosol(
    cytosol: &LabelMask,
    cytosol_discard: &BTreeSet<u32>,
    lookup: &LookupTable,
) -> LabelMask {
    let mut reverse: BTreeMap<u32, u32> = BTreeMap::new();
    for (&nucleus, &cytosol_id) in lookup {
        reverse.entry(cytosol_id).or_insert(nucleus);
    }

    cytosol.map_labels(|label| {
        if cytosol_discard.contains(&label) {
            BACKGROUND
        } else {
            reverse.get(&label).copied().unwrap_or(label)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    #[test]
    fn test_footprint_fractions() {
        let nucleus = LabelMask::from(array![[1u32, 1, 1, 1], [0, 0, 2, 2]]);
        let cytosol = LabelMask::from(array![[7u32, 7, 7, 8], [0, 0, 0, 9]]);
        let footprints = collect_footprints(&nucleus, &cytosol).unwrap();

        assert_eq!(footprints.len(), 2);
        let f1 = &footprints[&1];
        assert_eq!(f1.area(), 4);
        assert!((f1.fraction(7) - 0.75).abs() < 1e-12);
        assert!(!f1.touches_background());
        assert!(footprints[&2].touches_background());
    }

    #[test]
    fn test_shape_mismatch() {
        let nucleus = LabelMask::zeros(&[4, 4]).unwrap();
        let cytosol = LabelMask::zeros(&[4, 5]).unwrap();
        assert!(collect_footprints(&nucleus, &cytosol).is_err());
    }

    #[test]
    fn test_match_footprint_lowest_id_wins_ties() {
        let nucleus = LabelMask::from(array![[1u32, 1, 1, 1]]);
        let cytosol = LabelMask::from(array![[6u32, 6, 4, 4]]);
        let footprints = collect_footprints(&nucleus, &cytosol).unwrap();
        assert_eq!(match_footprint(&footprints[&1], 0.5), MatchOutcome::Matched(4));
        assert_eq!(match_footprint(&footprints[&1], 0.6), MatchOutcome::BelowThreshold);
    }

    #[test]
    fn test_match_footprint_background() {
        let nucleus = LabelMask::from(array![[1u32, 1, 1, 1]]);
        let cytosol = LabelMask::from(array![[5u32, 5, 5, 0]]);
        let footprints = collect_footprints(&nucleus, &cytosol).unwrap();
        assert_eq!(
            match_footprint(&footprints[&1], 0.5),
            MatchOutcome::TouchesBackground
        );
    }

    #[test]
    fn test_two_nuclei_in_one_cytosol_are_discarded() {
        let mut cyto = Array2::<u32>::zeros((6, 10));
        cyto.slice_mut(ndarray::s![0..6, 0..10]).fill(10);
        let mut nuc = Array2::<u32>::zeros((6, 10));
        nuc.slice_mut(ndarray::s![1..3, 1..3]).fill(1);
        nuc.slice_mut(ndarray::s![1..3, 6..8]).fill(2);

        let outcome = build_lookup(&LabelMask::from(nuc), &LabelMask::from(cyto), 0.5).unwrap();
        assert!(outcome.lookup.is_empty());
        assert_eq!(outcome.nuclei_discard, BTreeSet::from([1, 2]));
        assert_eq!(outcome.cytosol_discard, BTreeSet::from([10]));
        assert_eq!(outcome.stats.multinucleated_cytosols, 1);
    }

    #[test]
    fn test_orphan_cytosol_is_discarded() {
        let nucleus = LabelMask::from(array![[1u32, 1, 0, 0], [0, 0, 0, 0]]);
        let cytosol = LabelMask::from(array![[3u32, 3, 4, 4], [3, 3, 4, 4]]);
        let outcome = build_lookup(&nucleus, &cytosol, 0.5).unwrap();

        assert_eq!(outcome.lookup, LookupTable::from([(1, 3)]));
        assert_eq!(outcome.cytosol_discard, BTreeSet::from([4]));
        assert!(outcome.nuclei_discard.is_empty());
        assert_eq!(outcome.stats.orphan_cytosols, 1);
    }

    #[test]
    fn test_lookup_is_bijection() {
        let nucleus = LabelMask::from(array![
            [1u32, 0, 2, 0, 3, 0, 4],
            [0, 0, 0, 0, 0, 0, 0],
        ]);
        let cytosol = LabelMask::from(array![
            [11u32, 11, 12, 12, 12, 0, 0],
            [11, 11, 12, 12, 12, 13, 13],
        ]);
        let outcome = build_lookup(&nucleus, &cytosol, 0.5).unwrap();

        // 2 and 3 share cytosol 12, 4 sits on background
        assert_eq!(outcome.lookup, LookupTable::from([(1, 11)]));
        assert_eq!(outcome.nuclei_discard, BTreeSet::from([2, 3, 4]));
        assert_eq!(outcome.cytosol_discard, BTreeSet::from([12, 13]));

        let values: BTreeSet<u32> = outcome.lookup.values().copied().collect();
        assert_eq!(values.len(), outcome.lookup.len());
    }

    #[test]
    fn test_stages_compose() {
        let lookup = LookupTable::from([(1, 5), (2, 5), (3, 6)]);
        let occurrences = count_cytosol_occurrences(&lookup);
        assert_eq!(occurrences[&5], 2);
        assert_eq!(occurrences[&6], 1);

        let (nuclei, cytosols) = find_multinucleated(&lookup, &occurrences);
        assert_eq!(nuclei, BTreeSet::from([1, 2]));
        assert_eq!(cytosols, BTreeSet::from([5]));

        let orphans = find_orphan_cytosols(&BTreeSet::from([5, 6, 7]), &lookup);
        assert_eq!(orphans, BTreeSet::from([7]));

        let cleaned = cleanup_lookup(&lookup, &nuclei, &cytosols);
        assert_eq!(cleaned, LookupTable::from([(3, 6)]));
    }

    #[test]
    fn test_rewrite_relabels_each_pixel_once() {
        // ids swap between the two masks
        let cytosol = LabelMask::from(array![[1u32, 1, 2, 2, 3]]);
        let lookup = LookupTable::from([(1, 2), (2, 1)]);
        let rewritten = rewrite_cytosol(&cytosol, &BTreeSet::from([3]), &lookup);
        assert_eq!(rewritten.data(), &array![[2u32, 2, 1, 1, 0]].into_dyn());
    }
}

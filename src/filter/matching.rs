//! Reconciling nucleus and cytosol masks into one cell identity per object.

use crate::data::LabelMask;
use crate::error::{Result, SegError};
use crate::filter::lookup::{build_lookup, rewrite_cytosol, LookupTable, MatchStats};
use crate::mask::{downsample, unique_ids, upscale_to, zero_ids};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Configuration for [`NucleusCytosolMatcher`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Minimum share of a nucleus a cytosol must cover, in (0, 1].
    pub overlap_threshold: f64,
    /// Match on masks downsampled by this factor.
    pub downsampling_factor: Option<usize>,
    /// Open the upscaled masks to soften block edges.
    pub smoothing: bool,
    /// Disk radius of the smoothing opening.
    pub smoothing_radius: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.5,
            downsampling_factor: None,
            smoothing: true,
            smoothing_radius: 7,
        }
    }
}

impl MatchConfig {
    pub fn with_overlap_threshold(mut self, threshold: f64) -> Self {
        self.overlap_threshold = threshold;
        self
    }

    pub fn with_downsampling(mut self, factor: usize) -> Self {
        self.downsampling_factor = Some(factor);
        self
    }

    pub fn with_smoothing(mut self, smoothing: bool, radius: usize) -> Self {
        self.smoothing = smoothing;
        self.smoothing_radius = radius;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.overlap_threshold > 0.0 && self.overlap_threshold <= 1.0) {
            return Err(SegError::InvalidParameter(format!(
                "overlap_threshold must lie in (0, 1], got {}",
                self.overlap_threshold
            )));
        }
        if self.downsampling_factor == Some(0) {
            return Err(SegError::InvalidParameter(
                "downsampling_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of matching a nucleus/cytosol pair.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Surviving nucleus id to cytosol id pairs.
    pub lookup: LookupTable,
    pub nuclei_discard: BTreeSet<u32>,
    pub cytosol_discard: BTreeSet<u32>,
    /// Nucleus mask with discarded nuclei removed.
    pub nucleus_mask: LabelMask,
    /// Cytosol mask with discarded cytosols removed and the rest relabelled
    /// with their nucleus id.
    pub cytosol_mask: LabelMask,
    pub stats: MatchStats,
}

impl std::fmt::Display for MatchResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Nucleus/Cytosol Match Result")?;
        writeln!(f, "  Pairs kept:        {}", self.lookup.len())?;
        writeln!(f, "  Nuclei removed:    {}", self.nuclei_discard.len())?;
        writeln!(f, "  Cytosols removed:  {}", self.cytosol_discard.len())?;
        write!(f, "{}", self.stats)
    }
}

/// A matching session.
///
/// Caches the result for the last (nucleus, cytosol) pair; a different pair
/// rebuilds it.
#[derive(Debug, Clone)]
pub struct NucleusCytosolMatcher {
    config: MatchConfig,
    session: Option<MatchSession>,
}

#[derive(Debug, Clone)]
struct MatchSession {
    nucleus: LabelMask,
    cytosol: LabelMask,
    result: MatchResult,
}

impl NucleusCytosolMatcher {
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
        })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Match the pair without touching the cache.
    pub fn evaluate(&self, nucleus: &LabelMask, cytosol: &LabelMask) -> Result<MatchResult> {
        nucleus.ensure_same_shape(cytosol)?;

        let factor = self.config.downsampling_factor.filter(|&f| f > 1);
        let (nucleus_work, cytosol_work) = match factor {
            Some(f) => {
                debug!("Matching on masks downsampled by {}", f);
                (downsample(nucleus, f)?, downsample(cytosol, f)?)
            }
            None => (nucleus.clone(), cytosol.clone()),
        };

        let mut outcome = build_lookup(&nucleus_work, &cytosol_work, self.config.overlap_threshold)?;
        info!(
            "Matched {} nucleus/cytosol pairs; removing {} nuclei and {} cytosols",
            outcome.lookup.len(),
            outcome.nuclei_discard.len(),
            outcome.cytosol_discard.len()
        );
        debug!(
            "{} nuclei touch background, {} below overlap threshold {}, {} multinucleated cells",
            outcome.stats.touching_background,
            outcome.stats.below_threshold,
            self.config.overlap_threshold,
            outcome.stats.multinucleated_cytosols
        );

        let mut nucleus_mask = zero_ids(&nucleus_work, &outcome.nuclei_discard);
        let mut cytosol_mask =
            rewrite_cytosol(&cytosol_work, &outcome.cytosol_discard, &outcome.lookup);

        if let Some(f) = factor {
            let (smooth, radius) = (self.config.smoothing, self.config.smoothing_radius);
            nucleus_mask = upscale_to(&nucleus_mask, f, nucleus.shape(), smooth, radius)?;
            cytosol_mask = upscale_to(&cytosol_mask, f, cytosol.shape(), smooth, radius)?;

            // smoothing can erase small objects; keep the lookup in step with the masks
            let lost = vanished_pairs(&outcome.lookup, &nucleus_mask, &cytosol_mask);
            if !lost.is_empty() {
                info!("Removing {} pairs that vanished after upscaling", lost.len());
                let lost_ids: BTreeSet<u32> = lost.iter().map(|&(n, _)| n).collect();
                nucleus_mask = zero_ids(&nucleus_mask, &lost_ids);
                cytosol_mask = zero_ids(&cytosol_mask, &lost_ids);
                for &(n, c) in &lost {
                    outcome.lookup.remove(&n);
                    outcome.nuclei_discard.insert(n);
                    outcome.cytosol_discard.insert(c);
                }
                outcome.stats.lost_after_upscaling = lost.len();
                outcome.stats.matched_pairs = outcome.lookup.len();
            }
        }

        Ok(MatchResult {
            lookup: outcome.lookup,
            nuclei_discard: outcome.nuclei_discard,
            cytosol_discard: outcome.cytosol_discard,
            nucleus_mask,
            cytosol_mask,
            stats: outcome.stats,
        })
    }

    /// Cached result for the pair, computed if the session holds another pair.
    pub fn result(&mut self, nucleus: &LabelMask, cytosol: &LabelMask) -> Result<&MatchResult> {
        let session = match self.session.take() {
            Some(session) if session.nucleus == *nucleus && session.cytosol == *cytosol => {
                debug!("Reusing cached match result");
                session
            }
            _ => MatchSession {
                nucleus: nucleus.clone(),
                cytosol: cytosol.clone(),
                result: self.evaluate(nucleus, cytosol)?,
            },
        };
        Ok(&self.session.insert(session).result)
    }

    /// Nucleus id to cytosol id table for the pair.
    pub fn lookup_table(&mut self, nucleus: &LabelMask, cytosol: &LabelMask) -> Result<&LookupTable> {
        Ok(&self.result(nucleus, cytosol)?.lookup)
    }

    /// Cleaned (nucleus, cytosol) masks sharing ids per cell.
    pub fn filter(&mut self, nucleus: &LabelMask, cytosol: &LabelMask) -> Result<(LabelMask, LabelMask)> {
        let result = self.result(nucleus, cytosol)?;
        Ok((result.nucleus_mask.clone(), result.cytosol_mask.clone()))
    }

    pub fn cached(&self) -> Option<&MatchResult> {
        self.session.as_ref().map(|s| &s.result)
    }

    pub fn reset(&mut self) {
        self.session = None;
    }
}

/// Lookup pairs whose id is missing from either output mask.
fn vanished_pairs(lookup: &LookupTable, nucleus: &LabelMask, cytosol: &LabelMask) -> Vec<(u32, u32)> {
    let nucleus_ids = unique_ids(nucleus);
    let cytosol_ids = unique_ids(cytosol);
    lookup
        .iter()
        .filter(|(n, _)| !nucleus_ids.contains(n) || !cytosol_ids.contains(n))
        .map(|(&n, &c)| (n, c))
        .collect()
}

/// Match a pair in one call.
pub fn match_ids(nucleus: &LabelMask, cytosol: &LabelMask, config: &MatchConfig) -> Result<MatchResult> {
    NucleusCytosolMatcher::new(config.clone())?.evaluate(nucleus, cytosol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn no_smoothing() -> MatchConfig {
        MatchConfig::default().with_smoothing(false, 0)
    }

    #[test]
    fn test_invalid_overlap_threshold() {
        for t in [0.0, -0.1, 1.5, f64::NAN] {
            let config = MatchConfig::default().with_overlap_threshold(t);
            assert!(matches!(
                NucleusCytosolMatcher::new(config),
                Err(SegError::InvalidParameter(_))
            ));
        }
        assert!(NucleusCytosolMatcher::new(MatchConfig::default().with_overlap_threshold(1.0)).is_ok());
    }

    #[test]
    fn test_shape_mismatch_is_error() {
        let matcher = NucleusCytosolMatcher::new(MatchConfig::default()).unwrap();
        let err = matcher
            .evaluate(&LabelMask::zeros(&[4, 4]).unwrap(), &LabelMask::zeros(&[4, 6]).unwrap())
            .unwrap_err();
        assert!(matches!(err, SegError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_two_nuclei_in_one_cytosol() {
        let cytosol = LabelMask::from(Array2::from_elem((6, 10), 10u32));
        let mut nuc = Array2::<u32>::zeros((6, 10));
        nuc.slice_mut(ndarray::s![1..3, 1..3]).fill(1);
        nuc.slice_mut(ndarray::s![1..3, 6..8]).fill(2);
        let nucleus = LabelMask::from(nuc);

        let result = match_ids(&nucleus, &cytosol, &no_smoothing()).unwrap();
        assert!(result.lookup.is_empty());
        assert_eq!(result.nucleus_mask.foreground_len(), 0);
        assert_eq!(result.cytosol_mask.foreground_len(), 0);
    }

    #[test]
    fn test_mostly_enclosed_nucleus_is_matched_and_relabelled() {
        // nucleus 1 is 10 pixels, 9 on cytosol 20 and 1 on cytosol 30
        let mut cyto = Array2::<u32>::zeros((4, 12));
        cyto.slice_mut(ndarray::s![.., 0..6]).fill(20);
        cyto.slice_mut(ndarray::s![.., 6..12]).fill(30);
        let mut nuc = Array2::<u32>::zeros((4, 12));
        nuc.slice_mut(ndarray::s![1..2, 0..7]).fill(1);
        nuc.slice_mut(ndarray::s![2..3, 2..5]).fill(1);
        nuc.slice_mut(ndarray::s![1..3, 9..11]).fill(2);

        let result = match_ids(&LabelMask::from(nuc), &LabelMask::from(cyto), &no_smoothing()).unwrap();

        assert_eq!(result.lookup, LookupTable::from([(1, 20), (2, 30)]));
        assert!(result.nuclei_discard.is_empty());
        assert_eq!(result.cytosol_mask.get(&[0, 0]), Some(1));
        assert_eq!(result.cytosol_mask.get(&[3, 11]), Some(2));
        assert_eq!(unique_ids(&result.cytosol_mask), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_nucleus_touching_background_is_discarded() {
        let mut cyto = Array2::<u32>::zeros((5, 5));
        cyto.slice_mut(ndarray::s![0..5, 0..4]).fill(7);
        let mut nuc = Array2::<u32>::zeros((5, 5));
        nuc.slice_mut(ndarray::s![1..4, 2..5]).fill(3);

        let result = match_ids(&LabelMask::from(nuc), &LabelMask::from(cyto), &no_smoothing()).unwrap();
        assert_eq!(result.nuclei_discard, BTreeSet::from([3]));
        assert_eq!(result.cytosol_discard, BTreeSet::from([7]));
        assert_eq!(result.stats.touching_background, 1);
    }

    #[test]
    fn test_rematch_is_identity() {
        let mut cyto = Array2::<u32>::zeros((8, 16));
        cyto.slice_mut(ndarray::s![.., 0..8]).fill(4);
        cyto.slice_mut(ndarray::s![.., 8..16]).fill(9);
        let mut nuc = Array2::<u32>::zeros((8, 16));
        nuc.slice_mut(ndarray::s![2..5, 2..5]).fill(1);
        nuc.slice_mut(ndarray::s![2..5, 10..13]).fill(2);

        let first = match_ids(&LabelMask::from(nuc), &LabelMask::from(cyto), &no_smoothing()).unwrap();
        let second = match_ids(&first.nucleus_mask, &first.cytosol_mask, &no_smoothing()).unwrap();

        assert_eq!(second.lookup, LookupTable::from([(1, 1), (2, 2)]));
        assert_eq!(second.nucleus_mask, first.nucleus_mask);
        assert_eq!(second.cytosol_mask, first.cytosol_mask);
    }

    #[test]
    fn test_downsampled_matching_restores_shape() {
        let mut cyto = Array2::<u32>::zeros((18, 18));
        cyto.slice_mut(ndarray::s![0..9, ..]).fill(5);
        cyto.slice_mut(ndarray::s![9..18, ..]).fill(6);
        let mut nuc = Array2::<u32>::zeros((18, 18));
        nuc.slice_mut(ndarray::s![0..6, 0..6]).fill(1);
        nuc.slice_mut(ndarray::s![12..18, 12..18]).fill(2);

        let config = no_smoothing().with_downsampling(4);
        let result = match_ids(&LabelMask::from(nuc), &LabelMask::from(cyto), &config).unwrap();

        assert_eq!(result.nucleus_mask.shape(), &[18, 18]);
        assert_eq!(result.cytosol_mask.shape(), &[18, 18]);
        assert_eq!(result.lookup, LookupTable::from([(1, 5), (2, 6)]));
        // the upscaled cytosol carries nucleus ids
        assert_eq!(result.cytosol_mask.get(&[0, 17]), Some(1));
        assert_eq!(result.cytosol_mask.get(&[17, 0]), Some(2));
    }

    #[test]
    fn test_session_cache() {
        let cytosol = LabelMask::from(Array2::from_elem((4, 4), 3u32));
        let mut nuc = Array2::<u32>::zeros((4, 4));
        nuc[[1, 1]] = 1;
        let nucleus = LabelMask::from(nuc);

        let mut matcher = NucleusCytosolMatcher::new(no_smoothing()).unwrap();
        assert_eq!(matcher.lookup_table(&nucleus, &cytosol).unwrap(), &LookupTable::from([(1, 3)]));

        let (n, c) = matcher.filter(&nucleus, &cytosol).unwrap();
        assert_eq!(n, nucleus);
        assert_eq!(c.foreground_len(), 16);

        let empty = LabelMask::zeros(&[4, 4]).unwrap();
        assert!(matcher.lookup_table(&empty, &cytosol).unwrap().is_empty());
        assert_eq!(matcher.cached().unwrap().cytosol_discard, BTreeSet::from([3]));

        matcher.reset();
        assert!(matcher.cached().is_none());
    }

    /// A 4x4 grid of 12x12 cytosols, each holding a centred 4x4 nucleus.
    fn small_nuclei_grid() -> (LabelMask, LabelMask) {
        let mut nuc = Array2::<u32>::zeros((48, 48));
        let mut cyto = Array2::<u32>::zeros((48, 48));
        for k in 0..16usize {
            let (y0, x0) = ((k / 4) * 12, (k % 4) * 12);
            cyto.slice_mut(ndarray::s![y0..y0 + 12, x0..x0 + 12])
                .fill(100 + k as u32);
            nuc.slice_mut(ndarray::s![y0 + 4..y0 + 8, x0 + 4..x0 + 8])
                .fill(k as u32 + 1);
        }
        (LabelMask::from(nuc), LabelMask::from(cyto))
    }

    #[test]
    fn test_pairs_erased_by_smoothing_leave_the_lookup() {
        let (nucleus, cytosol) = small_nuclei_grid();
        let config = MatchConfig::default().with_downsampling(4);
        let result = match_ids(&nucleus, &cytosol, &config).unwrap();

        // a radius-7 opening erases every 4x4 nucleus
        assert_eq!(result.nucleus_mask.foreground_len(), 0);
        assert!(result.lookup.is_empty());
        assert_eq!(result.stats.lost_after_upscaling, 16);
        assert_eq!(result.stats.matched_pairs, 0);
        assert_eq!(result.nuclei_discard, (1..=16).collect::<BTreeSet<u32>>());
        assert_eq!(result.cytosol_discard, (100..116).collect::<BTreeSet<u32>>());
        assert_eq!(result.cytosol_mask.foreground_len(), 0);
    }

    #[test]
    fn test_lookup_matches_output_masks_after_upscaling() {
        let (nucleus, cytosol) = small_nuclei_grid();
        for config in [
            MatchConfig::default().with_downsampling(4),
            MatchConfig::default().with_downsampling(4).with_smoothing(true, 1),
            no_smoothing().with_downsampling(4),
        ] {
            let result = match_ids(&nucleus, &cytosol, &config).unwrap();
            let ids: BTreeSet<u32> = result.lookup.keys().copied().collect();
            assert_eq!(unique_ids(&result.nucleus_mask), ids);
            assert_eq!(unique_ids(&result.cytosol_mask), ids);
            assert_eq!(result.stats.matched_pairs, result.lookup.len());
        }
    }
}

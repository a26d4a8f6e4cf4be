//! Size-based filtering of segmented objects.
//!
//! Objects whose pixel count falls outside a threshold range are removed from
//! the mask. The range is either supplied explicitly or estimated by fitting a
//! Gaussian mixture to the object sizes and keeping a confidence interval
//! around one selected component.

use crate::data::{LabelMask, ObjectPopulation};
use crate::error::{Result, SegError};
use crate::mask::{downsample, unique_ids, zero_ids};
use crate::model::{estimate_threshold, PopulationPolicy, Threshold, ThresholdConfig, ThresholdFit};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Configuration for [`SizeFilter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeFilterConfig {
    /// Name of the mask, used in log lines and QC file names.
    pub label: String,
    /// Explicit (lower, upper) range; estimated automatically when unset.
    pub filter_threshold: Option<Threshold>,
    /// Fit the mixture model to log-transformed sizes.
    pub log_transform: bool,
    /// Probability mass retained around the chosen component.
    pub confidence_interval: f64,
    /// Number of mixture components.
    pub component_count: usize,
    /// Which component represents the objects to keep.
    pub population_policy: PopulationPolicy,
    /// Remove objects smaller than the lower bound.
    pub filter_lower: bool,
    /// Remove objects larger than the upper bound.
    pub filter_upper: bool,
    /// Measure sizes on a mask downsampled by this factor.
    pub downsampling_factor: Option<usize>,
    /// Seed for the mixture initialization.
    pub seed: u64,
}

impl Default for SizeFilterConfig {
    fn default() -> Self {
        Self {
            label: "segmask".to_string(),
            filter_threshold: None,
            log_transform: true,
            confidence_interval: 0.95,
            component_count: 1,
            population_policy: PopulationPolicy::Largest,
            filter_lower: true,
            filter_upper: true,
            downsampling_factor: None,
            seed: 0,
        }
    }
}

impl SizeFilterConfig {
    /// Create a config with the given mask label.
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            ..Default::default()
        }
    }

    /// Use an explicit threshold instead of fitting one.
    pub fn with_threshold(mut self, lower: f64, upper: f64) -> Self {
        self.filter_threshold = Some(Threshold { lower, upper });
        self
    }

    pub fn with_log_transform(mut self, log_transform: bool) -> Self {
        self.log_transform = log_transform;
        self
    }

    pub fn with_confidence_interval(mut self, confidence_interval: f64) -> Self {
        self.confidence_interval = confidence_interval;
        self
    }

    pub fn with_components(mut self, component_count: usize) -> Self {
        self.component_count = component_count;
        self
    }

    pub fn with_population_policy(mut self, policy: PopulationPolicy) -> Self {
        self.population_policy = policy;
        self
    }

    /// Enable or disable each tail of the range.
    pub fn with_tails(mut self, filter_lower: bool, filter_upper: bool) -> Self {
        self.filter_lower = filter_lower;
        self.filter_upper = filter_upper;
        self
    }

    pub fn with_downsampling(mut self, factor: usize) -> Self {
        self.downsampling_factor = Some(factor);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Check the configuration.
    ///
    /// # Errors
    /// * `Configuration` when both tails are disabled
    /// * `InvalidParameter` for an invalid explicit threshold, a confidence
    ///   interval outside (0, 1), zero components or a zero downsampling factor
    pub fn validate(&self) -> Result<()> {
        if !self.filter_lower && !self.filter_upper {
            return Err(SegError::Configuration(
                "At least one of filter_lower or filter_upper must be enabled, otherwise no filtering is performed".to_string(),
            ));
        }
        if let Some(threshold) = &self.filter_threshold {
            threshold.validate()?;
        }
        if !(self.confidence_interval > 0.0 && self.confidence_interval < 1.0) {
            return Err(SegError::InvalidParameter(format!(
                "confidence_interval must lie in (0, 1), got {}",
                self.confidence_interval
            )));
        }
        if self.component_count == 0 {
            return Err(SegError::InvalidParameter(
                "component_count must be at least 1".to_string(),
            ));
        }
        if self.downsampling_factor == Some(0) {
            return Err(SegError::InvalidParameter(
                "downsampling_factor must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn threshold_config(&self) -> ThresholdConfig {
        ThresholdConfig {
            log_transform: self.log_transform,
            confidence_interval: self.confidence_interval,
            component_count: self.component_count,
            population_policy: self.population_policy,
            seed: self.seed,
        }
    }
}

/// Outcome of size filtering one mask.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFilterResult {
    /// Mask label from the configuration.
    pub label: String,
    /// Range applied, in pixels.
    pub threshold: Threshold,
    /// Mixture fit, present when the threshold was estimated.
    pub estimate: Option<ThresholdFit>,
    /// Pixel count per object, in full-resolution pixels.
    pub population: ObjectPopulation,
    /// Objects below the lower bound (removed only when `filter_lower`).
    pub below: BTreeSet<u32>,
    /// Objects above the upper bound (removed only when `filter_upper`).
    pub above: BTreeSet<u32>,
    /// Ids removed from the mask.
    pub discard: BTreeSet<u32>,
    pub filter_lower: bool,
    pub filter_upper: bool,
}

impl SizeFilterResult {
    /// Zero the discarded ids in `mask`.
    pub fn apply(&self, mask: &LabelMask) -> LabelMask {
        zero_ids(mask, &self.discard)
    }

    /// Number of objects measured.
    pub fn n_objects(&self) -> usize {
        self.population.len()
    }

    /// Number of objects removed.
    pub fn n_removed(&self) -> usize {
        self.discard.len()
    }

    /// Ids that survive the filter.
    pub fn kept_ids(&self) -> BTreeSet<u32> {
        self.population.ids().difference(&self.discard).copied().collect()
    }
}

impl std::fmt::Display for SizeFilterResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Size Filter Result ({})", self.label)?;
        writeln!(f, "  Threshold: {}", self.threshold)?;
        writeln!(
            f,
            "  Source:    {}",
            if self.estimate.is_some() { "estimated" } else { "explicit" }
        )?;
        writeln!(f, "  Objects:   {}", self.n_objects())?;
        writeln!(
            f,
            "  Below:     {}{}",
            self.below.len(),
            if self.filter_lower { "" } else { " (kept)" }
        )?;
        writeln!(
            f,
            "  Above:     {}{}",
            self.above.len(),
            if self.filter_upper { "" } else { " (kept)" }
        )?;
        writeln!(f, "  Removed:   {}", self.n_removed())?;
        Ok(())
    }
}

/// A size-filtering session.
///
/// The session memoizes the population, threshold and discard set of the
/// last mask it evaluated: calling [`SizeFilter::filter`] again with the same
/// mask reuses them, while a different mask rebuilds them.
#[derive(Debug, Clone)]
pub struct SizeFilter {
    config: SizeFilterConfig,
    session: Option<SizeSession>,
}

#[derive(Debug, Clone)]
struct SizeSession {
    source: LabelMask,
    result: SizeFilterResult,
}

impl SizeFilter {
    /// Create a filter, validating its configuration.
    pub fn new(config: SizeFilterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            session: None,
        })
    }

    pub fn config(&self) -> &SizeFilterConfig {
        &self.config
    }

    /// Compute the filter outcome for `mask` without touching the cache.
    pub fn evaluate(&self, mask: &LabelMask) -> Result<SizeFilterResult> {
        let label = &self.config.label;

        let (population, vanished) = match self.config.downsampling_factor {
            Some(factor) if factor > 1 => {
                let reduced = downsample(mask, factor)?;
                let scale = (factor as u64).pow(mask.ndim() as u32);
                let population = ObjectPopulation::from_mask(&reduced).scaled(scale);
                let vanished: BTreeSet<u32> = unique_ids(mask)
                    .difference(&population.ids())
                    .copied()
                    .collect();
                debug!(
                    "Measured {} {} objects at 1/{} resolution; {} vanished when downsampled",
                    population.len(),
                    label,
                    factor,
                    vanished.len()
                );
                (population, vanished)
            }
            _ => (ObjectPopulation::from_mask(mask), BTreeSet::new()),
        };

        let (threshold, estimate) = match self.config.filter_threshold {
            Some(threshold) => (threshold, None),
            None => {
                let estimate = estimate_threshold(&population.counts(), &self.config.threshold_config())?;
                info!(
                    "Calculated threshold for {} with {}% confidence interval: {}",
                    label,
                    self.config.confidence_interval * 100.0,
                    estimate.threshold
                );
                (estimate.threshold, Some(estimate))
            }
        };

        let mut below = population.ids_below(threshold.lower);
        if threshold.lower > 0.0 {
            // objects lost to downsampling measured zero pixels
            below.extend(vanished.iter().copied());
        }
        let above = population.ids_above(threshold.upper);

        let mut discard = BTreeSet::new();
        if self.config.filter_lower {
            info!(
                "Found {} ids to remove from {} mask which are smaller than the chosen threshold range {}",
                below.len(),
                label,
                threshold
            );
            discard.extend(below.iter().copied());
        } else {
            info!(
                "Filtering lower threshold is disabled. Not filtering {} ids that fall below the threshold range {}",
                below.len(),
                threshold
            );
        }
        if self.config.filter_upper {
            info!(
                "Found {} ids to remove from {} mask which are bigger than the chosen threshold range {}",
                above.len(),
                label,
                threshold
            );
            discard.extend(above.iter().copied());
        } else {
            info!(
                "Filtering upper threshold is disabled. Not filtering {} ids that fall above the threshold range {}",
                above.len(),
                threshold
            );
        }

        Ok(SizeFilterResult {
            label: label.clone(),
            threshold,
            estimate,
            population,
            below,
            above,
            discard,
            filter_lower: self.config.filter_lower,
            filter_upper: self.config.filter_upper,
        })
    }

    /// Cached outcome for `mask`, computing it if the session holds a
    /// different mask or none at all.
    pub fn result(&mut self, mask: &LabelMask) -> Result<&SizeFilterResult> {
        let session = match self.session.take() {
            Some(session) if session.source == *mask => {
                debug!("Reusing cached size filter result for {}", self.config.label);
                session
            }
            _ => SizeSession {
                source: mask.clone(),
                result: self.evaluate(mask)?,
            },
        };
        Ok(&self.session.insert(session).result)
    }

    /// Ids to remove from `mask`.
    pub fn ids_to_remove(&mut self, mask: &LabelMask) -> Result<&BTreeSet<u32>> {
        Ok(&self.result(mask)?.discard)
    }

    /// Filter `mask`, returning a copy with outlier objects zeroed.
    pub fn filter(&mut self, mask: &LabelMask) -> Result<LabelMask> {
        Ok(self.result(mask)?.apply(mask))
    }

    /// Result cached from the last call, if any.
    pub fn cached(&self) -> Option<&SizeFilterResult> {
        self.session.as_ref().map(|s| &s.result)
    }

    /// Drop the cached result.
    pub fn reset(&mut self) {
        self.session = None;
    }
}

/// Size-filter a mask in one call.
pub fn filter_size(
    mask: &LabelMask,
    config: &SizeFilterConfig,
) -> Result<(LabelMask, SizeFilterResult)> {
    let filter = SizeFilter::new(config.clone())?;
    let result = filter.evaluate(mask)?;
    Ok((result.apply(mask), result))
}

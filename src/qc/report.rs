//! Diagnostics derived from filter results.

use crate::data::{LabelMask, BACKGROUND};
use crate::error::{Result, SegError};
use crate::filter::{MatchResult, SizeFilterResult};
use crate::model::{MixtureFit, Threshold};
use crate::qc::histogram::{Histogram, DEFAULT_BINS};
use crate::qc::size_profile::{profile_object_sizes, ObjectSizeProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Number of points on which fitted densities are evaluated.
pub const CURVE_POINTS: usize = 1000;

/// Classification value for kept objects.
pub const KEEP: u32 = 2;
/// Classification value for discarded objects.
pub const DISCARD: u32 = 1;

/// Weighted component densities sampled on an even grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureCurves {
    pub x: Vec<f64>,
    /// `weight * pdf(x)` per component.
    pub components: Vec<Vec<f64>>,
}

impl MixtureCurves {
    /// Sample each component of `fit` over `[lo, hi]`.
    pub fn sample(fit: &MixtureFit, lo: f64, hi: f64, points: usize) -> Result<Self> {
        if points < 2 {
            return Err(SegError::InvalidParameter(
                "Curves need at least two points".to_string(),
            ));
        }
        let step = (hi - lo) / (points - 1) as f64;
        let x: Vec<f64> = (0..points).map(|i| lo + step * i as f64).collect();
        let components = fit
            .components
            .iter()
            .map(|c| x.iter().map(|&xi| c.weight * c.pdf(xi)).collect())
            .collect();
        Ok(Self { x, components })
    }
}

/// Diagnostics of a fitted size model, all in the space the model was
/// fitted in (log pixels when the fit used a log transform).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixtureModelQc {
    /// Histogram of the values the model saw.
    pub histogram: Histogram,
    pub curves: MixtureCurves,
    pub threshold: Threshold,
    pub log_transform: bool,
}

/// Everything needed to render a size-filter diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeFilterQc {
    pub label: String,
    /// Histogram of raw pixel counts; `None` when the mask held no objects.
    pub histogram: Option<Histogram>,
    /// Present only when the threshold was estimated.
    pub model: Option<MixtureModelQc>,
    /// Threshold in pixels.
    pub threshold: Threshold,
    pub filter_lower: bool,
    pub filter_upper: bool,
    pub profile: ObjectSizeProfile,
}

impl SizeFilterQc {
    /// Build the diagnostic for a size-filter result.
    pub fn from_result(result: &SizeFilterResult) -> Result<Self> {
        let sizes: Vec<f64> = result.population.counts().iter().map(|&c| c as f64).collect();
        let histogram = if sizes.is_empty() {
            None
        } else {
            Some(Histogram::density(&sizes, DEFAULT_BINS)?)
        };

        let model = match &result.estimate {
            Some(estimate) => {
                let (lo, hi) = value_range(&estimate.values);
                Some(MixtureModelQc {
                    histogram: Histogram::density(&estimate.values, DEFAULT_BINS)?,
                    curves: MixtureCurves::sample(&estimate.fit, lo, hi, CURVE_POINTS)?,
                    threshold: estimate.fit_space_threshold,
                    log_transform: estimate.log_transform,
                })
            }
            None => None,
        };

        Ok(Self {
            label: result.label.clone(),
            histogram,
            model,
            threshold: result.threshold,
            filter_lower: result.filter_lower,
            filter_upper: result.filter_upper,
            profile: profile_object_sizes(&result.population),
        })
    }
}

fn value_range(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (lo, hi)
}

/// Map every object to [`KEEP`] or [`DISCARD`], background to 0.
pub fn classification_map(mask: &LabelMask, discard: &BTreeSet<u32>) -> LabelMask {
    mask.map_labels(|label| {
        if label == BACKGROUND {
            BACKGROUND
        } else if discard.contains(&label) {
            DISCARD
        } else {
            KEEP
        }
    })
}

/// Classification map of a size-filtered mask.
pub fn size_filter_classification(mask: &LabelMask, result: &SizeFilterResult) -> LabelMask {
    classification_map(mask, &result.discard)
}

/// (nucleus, cytosol) classification maps of a matching run.
pub fn match_classification(
    nucleus: &LabelMask,
    cytosol: &LabelMask,
    result: &MatchResult,
) -> (LabelMask, LabelMask) {
    (
        classification_map(nucleus, &result.nuclei_discard),
        classification_map(cytosol, &result.cytosol_discard),
    )
}

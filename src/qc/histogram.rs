//! Density-normalised histograms.

use crate::error::{Result, SegError};
use serde::{Deserialize, Serialize};

/// Default bin count for object-size histograms.
pub const DEFAULT_BINS: usize = 30;

/// Equal-width histogram whose bars integrate to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` bin edges.
    pub edges: Vec<f64>,
    /// Raw count per bin.
    pub counts: Vec<u64>,
    /// `count / (n * width)` per bin.
    pub densities: Vec<f64>,
    pub n_values: usize,
}

impl Histogram {
    /// Bin `values` over their range into `bins` equal-width bins.
    ///
    /// The last bin is closed on the right. When all values are equal the
    /// range is widened to `value ± 0.5`.
    pub fn density(values: &[f64], bins: usize) -> Result<Self> {
        if bins == 0 {
            return Err(SegError::InvalidParameter(
                "Histogram needs at least one bin".to_string(),
            ));
        }
        if values.is_empty() {
            return Err(SegError::EmptyData(
                "Cannot build a histogram without values".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SegError::InvalidParameter(
                "Histogram values must be finite".to_string(),
            ));
        }

        let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;
        let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();

        let mut counts = vec![0u64; bins];
        for &v in values {
            let bin = (((v - lo) / width) as usize).min(bins - 1);
            counts[bin] += 1;
        }

        let norm = values.len() as f64 * width;
        let densities = counts.iter().map(|&c| c as f64 / norm).collect();

        Ok(Self {
            edges,
            counts,
            densities,
            n_values: values.len(),
        })
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Width of every bin.
    pub fn bin_width(&self) -> f64 {
        match (self.edges.first(), self.edges.get(1)) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }

    /// Bin centres.
    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect()
    }
}

//! Size thresholds derived from a fitted mixture.

use crate::error::{Result, SegError};
use crate::model::gmm::{fit_gmm, GaussianComponent, GmmConfig, MixtureFit};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Which fitted component represents the population to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PopulationPolicy {
    /// Component with the largest mean.
    #[default]
    Largest,
    /// Component with the smallest mean.
    Smallest,
    /// Component with the largest weight.
    MostCommon,
    /// Component with the smallest weight.
    LeastCommon,
}

impl PopulationPolicy {
    /// Index of the component this policy selects. The first index wins ties.
    pub fn select(&self, components: &[GaussianComponent]) -> Option<usize> {
        let key = |c: &GaussianComponent| match self {
            PopulationPolicy::Largest | PopulationPolicy::Smallest => c.mean,
            PopulationPolicy::MostCommon | PopulationPolicy::LeastCommon => c.weight,
        };
        let prefer_max = matches!(
            self,
            PopulationPolicy::Largest | PopulationPolicy::MostCommon
        );

        let mut best: Option<(usize, f64)> = None;
        for (i, c) in components.iter().enumerate() {
            let value = key(c);
            let better = match best {
                None => true,
                Some((_, current)) if prefer_max => value > current,
                Some((_, current)) => value < current,
            };
            if better {
                best = Some((i, value));
            }
        }
        best.map(|(i, _)| i)
    }
}

impl std::fmt::Display for PopulationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PopulationPolicy::Largest => "largest",
            PopulationPolicy::Smallest => "smallest",
            PopulationPolicy::MostCommon => "mostcommon",
            PopulationPolicy::LeastCommon => "leastcommon",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PopulationPolicy {
    type Err = SegError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "largest" => Ok(PopulationPolicy::Largest),
            "smallest" => Ok(PopulationPolicy::Smallest),
            "mostcommon" => Ok(PopulationPolicy::MostCommon),
            "leastcommon" => Ok(PopulationPolicy::LeastCommon),
            other => Err(SegError::InvalidParameter(format!(
                "Unknown population policy '{}' (expected largest, smallest, mostcommon or leastcommon)",
                other
            ))),
        }
    }
}

/// A (lower, upper) object-size range in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub lower: f64,
    pub upper: f64,
}

impl Threshold {
    /// Create a threshold, rejecting NaN bounds and `lower > upper`.
    pub fn new(lower: f64, upper: f64) -> Result<Self> {
        let threshold = Self { lower, upper };
        threshold.validate()?;
        Ok(threshold)
    }

    pub fn validate(&self) -> Result<()> {
        if self.lower.is_nan() || self.upper.is_nan() {
            return Err(SegError::InvalidParameter(
                "Threshold bounds must not be NaN".to_string(),
            ));
        }
        if self.lower > self.upper {
            return Err(SegError::InvalidParameter(format!(
                "Lower threshold {} exceeds upper threshold {}",
                self.lower, self.upper
            )));
        }
        Ok(())
    }

    /// True when `value` lies within the closed range.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.lower, self.upper)
    }
}

/// Settings for automatic threshold estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Fit in natural-log space.
    pub log_transform: bool,
    /// Probability mass retained around the chosen component, in (0, 1).
    pub confidence_interval: f64,
    /// Number of mixture components.
    pub component_count: usize,
    /// Which component to keep.
    pub population_policy: PopulationPolicy,
    /// Random seed for the mixture initialization.
    pub seed: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            log_transform: true,
            confidence_interval: 0.95,
            component_count: 1,
            population_policy: PopulationPolicy::Largest,
            seed: 0,
        }
    }
}

/// Everything produced while estimating a threshold.
///
/// `values` and `fit_space_threshold` are in the space the model was fitted
/// in (log pixels when `log_transform` is set); `threshold` is always in
/// pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdFit {
    pub threshold: Threshold,
    pub fit_space_threshold: Threshold,
    pub fit: MixtureFit,
    pub selected_component: usize,
    pub log_transform: bool,
    pub confidence_interval: f64,
    pub values: Vec<f64>,
}

/// Bounds holding `confidence` of a normal distribution's mass.
///
/// Returns `mean + sd * Φ⁻¹(p)` and `mean + sd * Φ⁻¹(1 - p)` with
/// `p = (1 - confidence) / 2`.
pub fn confidence_bounds(mean: f64, sd: f64, confidence: f64) -> Result<(f64, f64)> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(SegError::InvalidParameter(format!(
            "Confidence interval must lie in (0, 1), got {}",
            confidence
        )));
    }
    let standard = Normal::new(0.0, 1.0)
        .map_err(|e| SegError::InvalidParameter(format!("standard normal: {}", e)))?;
    let p = (1.0 - confidence) / 2.0;
    Ok((
        mean + sd * standard.inverse_cdf(p),
        mean + sd * standard.inverse_cdf(1.0 - p),
    ))
}

/// Estimate a size threshold from per-object pixel counts.
pub fn estimate_threshold(counts: &[u64], config: &ThresholdConfig) -> Result<ThresholdFit> {
    let values: Vec<f64> = if config.log_transform {
        counts.iter().map(|&c| (c as f64).ln()).collect()
    } else {
        counts.iter().map(|&c| c as f64).collect()
    };

    let gmm_config = GmmConfig::new(config.component_count).with_seed(config.seed);
    let fit = fit_gmm(&values, &gmm_config)?;

    let selected = config
        .population_policy
        .select(&fit.components)
        .ok_or_else(|| SegError::Fit("mixture has no components".to_string()))?;
    let component = fit.components[selected];

    let (lower, upper) =
        confidence_bounds(component.mean, component.std_dev(), config.confidence_interval)?;
    let fit_space_threshold = Threshold { lower, upper };
    let threshold = if config.log_transform {
        Threshold {
            lower: lower.exp(),
            upper: upper.exp(),
        }
    } else {
        fit_space_threshold
    };

    Ok(ThresholdFit {
        threshold,
        fit_space_threshold,
        fit,
        selected_component: selected,
        log_transform: config.log_transform,
        confidence_interval: config.confidence_interval,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn component(mean: f64, weight: f64) -> GaussianComponent {
        GaussianComponent {
            mean,
            variance: 1.0,
            weight,
        }
    }

    #[test]
    fn test_policy_selection() {
        let comps = vec![component(5.0, 0.2), component(9.0, 0.1), component(1.0, 0.7)];
        assert_eq!(PopulationPolicy::Largest.select(&comps), Some(1));
        assert_eq!(PopulationPolicy::Smallest.select(&comps), Some(2));
        assert_eq!(PopulationPolicy::MostCommon.select(&comps), Some(2));
        assert_eq!(PopulationPolicy::LeastCommon.select(&comps), Some(1));
        assert_eq!(PopulationPolicy::Largest.select(&[]), None);
    }

    #[test]
    fn test_policy_ties_pick_first() {
        let comps = vec![component(3.0, 0.5), component(3.0, 0.5)];
        assert_eq!(PopulationPolicy::Largest.select(&comps), Some(0));
        assert_eq!(PopulationPolicy::LeastCommon.select(&comps), Some(0));
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("MostCommon".parse::<PopulationPolicy>().unwrap(), PopulationPolicy::MostCommon);
        assert_eq!("smallest".parse::<PopulationPolicy>().unwrap(), PopulationPolicy::Smallest);
        assert!("biggest".parse::<PopulationPolicy>().is_err());
    }

    #[test]
    fn test_confidence_bounds_95() {
        let (lo, hi) = confidence_bounds(10.0, 2.0, 0.95).unwrap();
        assert_relative_eq!(lo, 10.0 - 1.959964 * 2.0, epsilon = 1e-4);
        assert_relative_eq!(hi, 10.0 + 1.959964 * 2.0, epsilon = 1e-4);
    }

    #[test]
    fn test_confidence_bounds_invalid() {
        assert!(confidence_bounds(0.0, 1.0, 0.0).is_err());
        assert!(confidence_bounds(0.0, 1.0, 1.0).is_err());
        assert!(confidence_bounds(0.0, 1.0, 1.5).is_err());
    }

    #[test]
    fn test_threshold_validation() {
        assert!(Threshold::new(10.0, 5.0).is_err());
        assert!(Threshold::new(f64::NAN, 5.0).is_err());
        let t = Threshold::new(5.0, 10.0).unwrap();
        assert!(t.contains(5.0));
        assert!(t.contains(10.0));
        assert!(!t.contains(10.5));
    }

    #[test]
    fn test_estimate_threshold_linear_space() {
        let counts: Vec<u64> = vec![90, 95, 100, 100, 105, 110, 98, 102];
        let config = ThresholdConfig {
            log_transform: false,
            ..Default::default()
        };
        let result = estimate_threshold(&counts, &config).unwrap();

        let mean = counts.iter().sum::<u64>() as f64 / counts.len() as f64;
        assert_relative_eq!(result.fit.components[0].mean, mean, epsilon = 1e-9);
        assert!(result.threshold.lower < mean && result.threshold.upper > mean);
        assert_eq!(result.threshold, result.fit_space_threshold);
    }

    #[test]
    fn test_estimate_threshold_log_space_exponentiates() {
        let counts: Vec<u64> = vec![50, 80, 100, 120, 150, 200, 90, 110];
        let result = estimate_threshold(&counts, &ThresholdConfig::default()).unwrap();

        assert!(result.log_transform);
        assert_relative_eq!(
            result.threshold.lower,
            result.fit_space_threshold.lower.exp(),
            epsilon = 1e-9
        );
        assert_relative_eq!(
            result.threshold.upper,
            result.fit_space_threshold.upper.exp(),
            epsilon = 1e-9
        );
        assert_relative_eq!(result.values[0], 50f64.ln(), epsilon = 1e-12);
    }

    #[test]
    fn test_estimate_threshold_reproducible() {
        let counts: Vec<u64> = (1..200).map(|i| 20 + (i * 37 % 101) as u64 + if i % 3 == 0 { 400 } else { 0 }).collect();
        let config = ThresholdConfig {
            component_count: 2,
            population_policy: PopulationPolicy::MostCommon,
            seed: 3,
            ..Default::default()
        };
        let a = estimate_threshold(&counts, &config).unwrap();
        let b = estimate_threshold(&counts, &config).unwrap();
        assert_eq!(a.threshold, b.threshold);
        assert_eq!(a.selected_component, b.selected_component);
    }
}

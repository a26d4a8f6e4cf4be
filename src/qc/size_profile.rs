//! Summary statistics of object sizes in a mask.

use crate::data::ObjectPopulation;
use serde::{Deserialize, Serialize};

/// Distribution of per-object pixel counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectSizeProfile {
    /// Number of objects.
    pub n_objects: usize,
    /// Mean object size in pixels.
    pub mean: f64,
    /// Median object size in pixels.
    pub median: f64,
    /// Standard deviation of object sizes.
    pub std_dev: f64,
    pub min: u64,
    pub max: u64,
    /// Coefficient of variation (std_dev / mean).
    pub cv: f64,
    /// Objects below mean - 2*std_dev.
    pub n_small: usize,
    /// Objects above mean + 2*std_dev.
    pub n_large: usize,
}

impl ObjectSizeProfile {
    /// Sizes vary strongly (CV > 0.5).
    pub fn is_highly_variable(&self) -> bool {
        self.cv > 0.5
    }
}

impl std::fmt::Display for ObjectSizeProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Object Size Profile")?;
        writeln!(f, "  Objects: {}", self.n_objects)?;
        writeln!(f, "  Mean:    {:.1}", self.mean)?;
        writeln!(f, "  Median:  {:.1}", self.median)?;
        writeln!(f, "  Std Dev: {:.1}", self.std_dev)?;
        writeln!(f, "  Min:     {}", self.min)?;
        writeln!(f, "  Max:     {}", self.max)?;
        writeln!(f, "  CV:      {:.2}", self.cv)?;
        writeln!(f, "  Small objects: {}", self.n_small)?;
        writeln!(f, "  Large objects: {}", self.n_large)?;
        Ok(())
    }
}

/// Profile object sizes of a population.
pub fn profile_object_sizes(population: &ObjectPopulation) -> ObjectSizeProfile {
    let sizes = population.counts();
    let n = sizes.len();
    if n == 0 {
        return ObjectSizeProfile::default();
    }

    let mean = sizes.iter().sum::<u64>() as f64 / n as f64;
    let variance = sizes
        .iter()
        .map(|&x| {
            let diff = x as f64 - mean;
            diff * diff
        })
        .sum::<f64>()
        / n as f64;
    let std_dev = variance.sqrt();

    let mut sorted = sizes.clone();
    sorted.sort_unstable();
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    } else {
        sorted[n / 2] as f64
    };

    let low = mean - 2.0 * std_dev;
    let high = mean + 2.0 * std_dev;

    ObjectSizeProfile {
        n_objects: n,
        mean,
        median,
        std_dev,
        min: sorted[0],
        max: sorted[n - 1],
        cv: if mean > 0.0 { std_dev / mean } else { 0.0 },
        n_small: sizes.iter().filter(|&&x| (x as f64) < low).count(),
        n_large: sizes.iter().filter(|&&x| (x as f64) > high).count(),
    }
}

//! Statistical models for object-size populations.

pub mod gmm;
pub mod threshold;

pub use gmm::{fit_gmm, GaussianComponent, GmmConfig, MixtureFit};
pub use threshold::{
    confidence_bounds, estimate_threshold, PopulationPolicy, Threshold, ThresholdConfig,
    ThresholdFit,
};

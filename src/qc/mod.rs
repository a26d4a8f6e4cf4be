//! Read-only quality-control diagnostics for filter results.

mod histogram;
mod report;
mod sink;
mod size_profile;

pub use histogram::{Histogram, DEFAULT_BINS};
pub use report::{
    classification_map, match_classification, size_filter_classification, MixtureCurves,
    MixtureModelQc, SizeFilterQc, CURVE_POINTS, DISCARD, KEEP,
};
pub use sink::{JsonQcSink, QcSink};
pub use size_profile::{profile_object_sizes, ObjectSizeProfile};

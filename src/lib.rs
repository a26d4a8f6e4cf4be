//! Composable Segmentation Mask Filtering Library
//!
//! This library provides modular primitives for cleaning up label masks
//! produced by cell segmentation: removing objects of implausible size and
//! reconciling nucleus and cytosol masks into one identity per cell.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (LabelMask, ObjectPopulation)
//! - **mask**: Pure mask operations (id removal, resampling, morphology)
//! - **model**: Gaussian mixture fitting and size thresholds
//! - **filter**: Size filtering and nucleus/cytosol id matching
//! - **qc**: Read-only diagnostics (histograms, fitted curves, classification maps)
//! - **pipeline**: Pipeline composition and execution
//!
//! # Example
//!
//! ```no_run
//! use composable_segfilter::prelude::*;
//!
//! let nucleus = LabelMask::from_tsv("nucleus.tsv").unwrap();
//! let cytosol = LabelMask::from_tsv("cytosol.tsv").unwrap();
//!
//! let output = Pipeline::new()
//!     .filter_nucleus_size(SizeFilterConfig::new("nucleus"))
//!     .filter_cytosol_size(SizeFilterConfig::new("cytosol").with_components(2))
//!     .match_ids(MatchConfig::default().with_downsampling(4))
//!     .run(&nucleus, Some(&cytosol))
//!     .unwrap();
//!
//! println!("{}", output);
//! ```

pub mod data;
pub mod error;
pub mod filter;
pub mod mask;
pub mod model;
pub mod pipeline;
pub mod qc;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::data::{LabelMask, ObjectPopulation, BACKGROUND};
    pub use crate::error::{Result, SegError};
    pub use crate::filter::{
        // Size filtering
        filter_size, SizeFilter, SizeFilterConfig, SizeFilterResult,
        // Identity matching
        build_lookup, match_ids, LookupTable, MatchConfig, MatchResult, MatchStats,
        NucleusCytosolMatcher,
    };
    pub use crate::mask::{downsample, opening, unique_ids, upscale, upscale_to, zero_ids};
    pub use crate::model::{
        estimate_threshold, fit_gmm, GmmConfig, MixtureFit, PopulationPolicy, Threshold,
        ThresholdConfig,
    };
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutput, PipelineStep};
    pub use crate::qc::{JsonQcSink, QcSink, SizeFilterQc};
}

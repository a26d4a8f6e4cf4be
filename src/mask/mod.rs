//! Pure operations on label masks.

pub mod ids;
pub mod morphology;
pub mod resample;

pub use ids::{unique_ids, zero_ids};
pub use morphology::{dilation, disk_footprint, erosion, opening};
pub use resample::{downsample, upscale, upscale_to};

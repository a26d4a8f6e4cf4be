//! Data structures for segmentation mask filtering.

mod label_mask;
mod population;

pub use label_mask::{LabelMask, BACKGROUND};
pub use population::ObjectPopulation;

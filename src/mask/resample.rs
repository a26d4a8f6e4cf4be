//! Block downsampling and pixel-repeat upscaling of label masks.
//!
//! Downsampling reduces every `n`-sized block (along all axes) to the label
//! that occupies most of its pixels, background included. Ties resolve to the
//! smallest label. Blocks that run past the edge of the mask vote with the
//! pixels they do contain, so each axis shrinks to `ceil(len / n)`.

use crate::data::LabelMask;
use crate::error::{Result, SegError};
use crate::mask::morphology::opening;
use ndarray::{ArrayD, IxDyn, Slice};
use rayon::prelude::*;

/// Reduce each `factor`-sized block to a single majority label.
pub fn downsample(mask: &LabelMask, factor: usize) -> Result<LabelMask> {
    validate_factor(factor)?;
    if factor == 1 {
        return Ok(mask.clone());
    }

    let source = mask.view();
    let out_shape: Vec<usize> = mask.shape().iter().map(|&len| len.div_ceil(factor)).collect();
    let n_blocks: usize = out_shape.iter().product();

    let labels: Vec<u32> = (0..n_blocks)
        .into_par_iter()
        .map(|flat| {
            let index = unravel_index(flat, &out_shape);
            let block = source.slice_each_axis(|axis| {
                let start = index[axis.axis.index()] * factor;
                Slice::from(start..(start + factor).min(axis.len))
            });
            let mut votes: Vec<u32> = block.iter().copied().collect();
            majority_label(&mut votes)
        })
        .collect();

    LabelMask::new(ArrayD::from_shape_vec(IxDyn(&out_shape), labels)?)
}

/// Row-major multi-index of a flat offset into `shape`.
fn unravel_index(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0usize; shape.len()];
    for (axis, &len) in shape.iter().enumerate().rev() {
        index[axis] = flat % len;
        flat /= len;
    }
    index
}

/// Repeat each pixel `factor` times along every axis.
///
/// With `smooth`, a disk opening of `radius` is applied afterwards to soften
/// the block edges.
pub fn upscale(mask: &LabelMask, factor: usize, smooth: bool, radius: usize) -> Result<LabelMask> {
    validate_factor(factor)?;
    let out_shape: Vec<usize> = mask.shape().iter().map(|&len| len * factor).collect();
    upscale_to(mask, factor, &out_shape, smooth, radius)
}

/// Upscale by `factor` and crop to `shape`.
///
/// Used to bring a downsampled mask back onto the grid of the mask it came
/// from; `shape` may not exceed `mask.shape() * factor` on any axis.
pub fn upscale_to(
    mask: &LabelMask,
    factor: usize,
    shape: &[usize],
    smooth: bool,
    radius: usize,
) -> Result<LabelMask> {
    validate_factor(factor)?;
    let max_shape: Vec<usize> = mask.shape().iter().map(|&len| len * factor).collect();
    if shape.len() != max_shape.len() || shape.iter().zip(&max_shape).any(|(s, m)| s > m) {
        return Err(SegError::ShapeMismatch {
            expected: max_shape,
            actual: shape.to_vec(),
        });
    }

    let source = mask.data();
    let mut src_index = vec![0usize; shape.len()];
    let repeated = ArrayD::from_shape_fn(IxDyn(shape), |index| {
        for (axis, src) in src_index.iter_mut().enumerate() {
            *src = index[axis] / factor;
        }
        source[src_index.as_slice()]
    });

    let upscaled = LabelMask::new(repeated)?;
    if smooth {
        opening(&upscaled, radius)
    } else {
        Ok(upscaled)
    }
}

/// Most frequent value in `votes`, smallest value on ties.
fn majority_label(votes: &mut [u32]) -> u32 {
    votes.sort_unstable();

    let mut best = 0u32;
    let mut best_count = 0usize;
    let mut i = 0;
    while i < votes.len() {
        let value = votes[i];
        let mut j = i;
        while j < votes.len() && votes[j] == value {
            j += 1;
        }
        if j - i > best_count {
            best = value;
            best_count = j - i;
        }
        i = j;
    }
    best
}

fn validate_factor(factor: usize) -> Result<()> {
    if factor == 0 {
        return Err(SegError::InvalidParameter(
            "Resampling factor must be at least 1".to_string(),
        ));
    }
    Ok(())
}

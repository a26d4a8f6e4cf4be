//! Grey-level morphology on label masks with a disk footprint.
//!
//! Erosion takes the minimum label under the footprint and dilation the
//! maximum; pixels outside the image are ignored. An opening (erosion then
//! dilation) removes the staircase artifacts left behind by pixel-repeat
//! upscaling. For 3-D masks the disk is applied within each plane of the last
//! two axes.

use crate::data::LabelMask;
use crate::error::Result;
use ndarray::{ArrayView2, ArrayViewMut2, Axis, Ix2, Zip};

/// Offsets `(dy, dx)` of a disk of the given radius.
///
/// Contains every offset with `dy² + dx² <= radius²`, so radius 0 is the
/// single centre pixel.
pub fn disk_footprint(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let r2 = r * r;
    let mut offsets = Vec::with_capacity((2 * radius + 1).pow(2));
    for dy in -r..=r {
        for dx in -r..=r {
            if dy * dy + dx * dx <= r2 {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

#[derive(Debug, Clone, Copy)]
enum RankOp {
    Min,
    Max,
}

impl RankOp {
    #[inline]
    fn identity(self) -> u32 {
        match self {
            RankOp::Min => u32::MAX,
            RankOp::Max => u32::MIN,
        }
    }

    #[inline]
    fn combine(self, a: u32, b: u32) -> u32 {
        match self {
            RankOp::Min => a.min(b),
            RankOp::Max => a.max(b),
        }
    }
}

/// Grey-level erosion with a disk of `radius`.
pub fn erosion(mask: &LabelMask, radius: usize) -> Result<LabelMask> {
    rank_filter(mask, &disk_footprint(radius), RankOp::Min)
}

/// Grey-level dilation with a disk of `radius`.
pub fn dilation(mask: &LabelMask, radius: usize) -> Result<LabelMask> {
    rank_filter(mask, &disk_footprint(radius), RankOp::Max)
}

/// Morphological opening: erosion followed by dilation with the same disk.
pub fn opening(mask: &LabelMask, radius: usize) -> Result<LabelMask> {
    if radius == 0 {
        return Ok(mask.clone());
    }
    let footprint = disk_footprint(radius);
    let eroded = rank_filter(mask, &footprint, RankOp::Min)?;
    rank_filter(&eroded, &footprint, RankOp::Max)
}

fn rank_filter(mask: &LabelMask, footprint: &[(isize, isize)], op: RankOp) -> Result<LabelMask> {
    let mut out = mask.data().clone();

    if mask.ndim() == 2 {
        let plane = mask.data().view().into_dimensionality::<Ix2>()?;
        let target = out.view_mut().into_dimensionality::<Ix2>()?;
        filter_plane(plane, target, footprint, op);
    } else {
        for (plane, target) in mask
            .data()
            .axis_iter(Axis(0))
            .zip(out.axis_iter_mut(Axis(0)))
        {
            let plane = plane.into_dimensionality::<Ix2>()?;
            let target = target.into_dimensionality::<Ix2>()?;
            filter_plane(plane, target, footprint, op);
        }
    }

    LabelMask::new(out)
}

fn filter_plane(
    input: ArrayView2<'_, u32>,
    mut output: ArrayViewMut2<'_, u32>,
    footprint: &[(isize, isize)],
    op: RankOp,
) {
    let (height, width) = input.dim();
    let (h, w) = (height as isize, width as isize);

    Zip::indexed(&mut output).par_for_each(|(y, x), value| {
        let mut acc = op.identity();
        for &(dy, dx) in footprint {
            let yy = y as isize + dy;
            let xx = x as isize + dx;
            if yy >= 0 && yy < h && xx >= 0 && xx < w {
                acc = op.combine(acc, input[[yy as usize, xx as usize]]);
            }
        }
        *value = acc;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2, Array3};

    #[test]
    fn test_disk_footprint_shape() {
        assert_eq!(disk_footprint(0), vec![(0, 0)]);

        let r1 = disk_footprint(1);
        assert_eq!(r1.len(), 5);
        assert!(r1.contains(&(0, 0)));
        assert!(r1.contains(&(-1, 0)));
        assert!(!r1.contains(&(1, 1)));

        // skimage.morphology.disk(2) has 13 ones
        assert_eq!(disk_footprint(2).len(), 13);
    }

    #[test]
    fn test_erosion_shrinks_object() {
        let mut data = Array2::<u32>::zeros((7, 7));
        data.slice_mut(ndarray::s![1..6, 1..6]).fill(4);
        let mask = LabelMask::from(data);

        let eroded = erosion(&mask, 1).unwrap();
        assert_eq!(eroded.get(&[3, 3]), Some(4));
        assert_eq!(eroded.get(&[1, 1]), Some(0));
        assert_eq!(eroded.get(&[1, 3]), Some(0));
        assert_eq!(eroded.get(&[2, 2]), Some(4));
    }

    #[test]
    fn test_dilation_grows_object() {
        let mut data = Array2::<u32>::zeros((5, 5));
        data[[2, 2]] = 3;
        let mask = LabelMask::from(data);

        let dilated = dilation(&mask, 1).unwrap();
        assert_eq!(dilated.foreground_len(), 5);
        assert_eq!(dilated.get(&[1, 2]), Some(3));
        assert_eq!(dilated.get(&[1, 1]), Some(0));
    }

    #[test]
    fn test_border_pixels_ignore_outside() {
        let mask = LabelMask::from(array![[6u32, 6], [6, 6]]);
        assert_eq!(erosion(&mask, 1).unwrap(), mask);
        assert_eq!(dilation(&mask, 1).unwrap(), mask);
    }

    #[test]
    fn test_opening_removes_small_speckle() {
        let mut data = Array2::<u32>::zeros((9, 9));
        data.slice_mut(ndarray::s![3..8, 3..8]).fill(2);
        data[[0, 0]] = 5; // isolated single-pixel speckle
        let mask = LabelMask::from(data);

        let opened = opening(&mask, 1).unwrap();
        assert_eq!(opened.get(&[0, 0]), Some(0));
        assert_eq!(opened.get(&[5, 5]), Some(2));
        assert_eq!(opened.get(&[3, 5]), Some(2));
    }

    #[test]
    fn test_opening_radius_zero_is_identity() {
        let mask = LabelMask::from(array![[0u32, 1], [2, 3]]);
        assert_eq!(opening(&mask, 0).unwrap(), mask);
    }

    #[test]
    fn test_3d_filters_each_plane_independently() {
        let mut data = Array3::<u32>::zeros((2, 5, 5));
        data[[0, 2, 2]] = 8;
        let mask = LabelMask::from(data);

        let dilated = dilation(&mask, 1).unwrap();
        assert_eq!(dilated.get(&[0, 1, 2]), Some(8));
        // nothing leaks into the neighbouring plane
        assert_eq!(dilated.get(&[1, 2, 2]), Some(0));
    }
}

//! Integer label masks produced by a segmentation step.

use crate::error::{Result, SegError};
use ndarray::{Array2, Array3, ArrayD, ArrayViewD, IxDyn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Background sentinel shared by every mask.
pub const BACKGROUND: u32 = 0;

/// A 2-D or 3-D label mask.
///
/// Value 0 is background; every positive value identifies one segmented
/// object within this mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMask {
    data: ArrayD<u32>,
}

impl LabelMask {
    /// Wrap an array, rejecting anything that is not 2-D or 3-D.
    pub fn new(data: ArrayD<u32>) -> Result<Self> {
        match data.ndim() {
            2 | 3 => Ok(Self { data }),
            n => Err(SegError::UnsupportedDimensionality(n)),
        }
    }

    /// Create an all-background mask of the given shape.
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        Self::new(ArrayD::zeros(IxDyn(shape)))
    }

    /// Build a mask from row-major label values.
    pub fn from_shape_vec(shape: &[usize], values: Vec<u32>) -> Result<Self> {
        Self::new(ArrayD::from_shape_vec(IxDyn(shape), values)?)
    }

    /// Load a 2-D mask from a TSV file.
    ///
    /// Expected format: one image row per line, labels separated by tabs,
    /// no header. All rows must have the same number of columns.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut values: Vec<u32> = Vec::new();
        let mut width: Option<usize> = None;
        let mut height = 0usize;

        for (row_idx, record) in reader.records().enumerate() {
            let record = record?;
            if record.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            match width {
                None => width = Some(record.len()),
                Some(w) if w != record.len() => {
                    return Err(SegError::ShapeMismatch {
                        expected: vec![w],
                        actual: vec![record.len()],
                    });
                }
                Some(_) => {}
            }
            for (col_idx, field) in record.iter().enumerate() {
                let label: u32 = field.trim().parse().map_err(|_| SegError::InvalidLabel {
                    value: field.to_string(),
                    row: row_idx,
                    col: col_idx,
                })?;
                values.push(label);
            }
            height += 1;
        }

        let width = width.ok_or_else(|| SegError::EmptyData("Empty mask TSV".to_string()))?;
        Self::from_shape_vec(&[height, width], values)
    }

    /// Write a 2-D mask to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.ndim() != 2 {
            return Err(SegError::UnsupportedDimensionality(self.ndim()));
        }
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        for row in self.data.outer_iter() {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}", line.join("\t"))?;
        }
        writer.flush()?;

        Ok(())
    }

    /// Shape of the mask.
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes (2 or 3).
    #[inline]
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Total number of pixels (voxels for 3-D masks).
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the mask has no pixels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Label at a pixel index.
    #[inline]
    pub fn get(&self, index: &[usize]) -> Option<u32> {
        self.data.get(index).copied()
    }

    /// Borrow the underlying array.
    #[inline]
    pub fn data(&self) -> &ArrayD<u32> {
        &self.data
    }

    /// Read-only view of the labels.
    #[inline]
    pub fn view(&self) -> ArrayViewD<'_, u32> {
        self.data.view()
    }

    /// Consume the mask, returning the array.
    pub fn into_inner(self) -> ArrayD<u32> {
        self.data
    }

    /// Apply a label-to-label function to every pixel.
    pub fn map_labels<F>(&self, f: F) -> Self
    where
        F: FnMut(u32) -> u32,
    {
        Self {
            data: self.data.mapv(f),
        }
    }

    /// Number of pixels that are not background.
    pub fn foreground_len(&self) -> usize {
        self.data.iter().filter(|&&v| v != BACKGROUND).count()
    }

    /// Fail unless `other` has exactly the same shape.
    pub fn ensure_same_shape(&self, other: &LabelMask) -> Result<()> {
        if self.shape() != other.shape() {
            return Err(SegError::ShapeMismatch {
                expected: self.shape().to_vec(),
                actual: other.shape().to_vec(),
            });
        }
        Ok(())
    }
}

impl From<Array2<u32>> for LabelMask {
    fn from(data: Array2<u32>) -> Self {
        Self {
            data: data.into_dyn(),
        }
    }
}

impl From<Array3<u32>> for LabelMask {
    fn from(data: Array3<u32>) -> Self {
        Self {
            data: data.into_dyn(),
        }
    }
}

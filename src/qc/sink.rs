//! Destinations for QC diagnostics.

use crate::data::LabelMask;
use crate::error::Result;
use crate::model::Threshold;
use crate::qc::{Histogram, MixtureModelQc, ObjectSizeProfile, SizeFilterQc};
use log::debug;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Receives diagnostics as they are produced.
///
/// Implementations decide how (and whether) to render them; the filters
/// never read anything back.
pub trait QcSink {
    /// Size-filter histogram and fitted model.
    fn write_size_filter(&mut self, qc: &SizeFilterQc) -> Result<()>;

    /// A keep/discard classification map.
    fn write_classification(&mut self, name: &str, map: &LabelMask) -> Result<()>;
}

/// Writes diagnostics as pretty-printed JSON files into a directory.
///
/// Size-filter diagnostics go to `<label>_histogram.json` (raw pixel counts,
/// `null` for a mask without objects) and, when a model was fitted,
/// `<label>_mixture_model.json` (fit space). Classification maps go to
/// `<name>_classification.json`.
#[derive(Debug, Clone)]
pub struct JsonQcSink {
    directory: PathBuf,
}

#[derive(Serialize)]
struct MixtureModelRecord<'a> {
    label: &'a str,
    #[serde(flatten)]
    model: &'a MixtureModelQc,
    filter_lower: bool,
    filter_upper: bool,
}

#[derive(Serialize)]
struct HistogramRecord<'a> {
    label: &'a str,
    histogram: Option<&'a Histogram>,
    threshold: Threshold,
    profile: &'a ObjectSizeProfile,
}

#[derive(Serialize)]
struct ClassificationRecord<'a> {
    name: &'a str,
    shape: &'a [usize],
    values: Vec<u32>,
}

impl JsonQcSink {
    /// Create a sink writing into `directory`, creating it if needed.
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<()> {
        let path = self.directory.join(file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        debug!("Wrote QC output {}", path.display());
        Ok(())
    }
}

impl QcSink for JsonQcSink {
    fn write_size_filter(&mut self, qc: &SizeFilterQc) -> Result<()> {
        self.write_json(
            &format!("{}_histogram.json", qc.label),
            &HistogramRecord {
                label: &qc.label,
                histogram: qc.histogram.as_ref(),
                threshold: qc.threshold,
                profile: &qc.profile,
            },
        )?;

        if let Some(model) = &qc.model {
            self.write_json(
                &format!("{}_mixture_model.json", qc.label),
                &MixtureModelRecord {
                    label: &qc.label,
                    model,
                    filter_lower: qc.filter_lower,
                    filter_upper: qc.filter_upper,
                },
            )?;
        }
        Ok(())
    }

    fn write_classification(&mut self, name: &str, map: &LabelMask) -> Result<()> {
        self.write_json(
            &format!("{}_classification.json", name),
            &ClassificationRecord {
                name,
                shape: map.shape(),
                values: map.data().iter().copied().collect(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{filter_size, SizeFilterConfig};
    use ndarray::Array2;
    use tempfile::tempdir;

    fn varied_mask() -> LabelMask {
        let cell = 10;
        let mut data = Array2::<u32>::zeros((cell, cell * 24));
        for i in 0..24 {
            let side = 4 + i % 5;
            data.slice_mut(ndarray::s![0..side, i * cell..i * cell + side])
                .fill(i as u32 + 1);
        }
        LabelMask::from(data)
    }

    #[test]
    fn test_json_sink_writes_size_filter_files() {
        let dir = tempdir().unwrap();
        let mut sink = JsonQcSink::new(dir.path().join("qc")).unwrap();

        let mask = varied_mask();
        let (_, result) = filter_size(&mask, &SizeFilterConfig::new("cytosol")).unwrap();
        let qc = SizeFilterQc::from_result(&result).unwrap();
        sink.write_size_filter(&qc).unwrap();

        let hist_path = dir.path().join("qc/cytosol_histogram.json");
        let model_path = dir.path().join("qc/cytosol_mixture_model.json");
        assert!(hist_path.exists());
        assert!(model_path.exists());

        let model: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(model_path).unwrap()).unwrap();
        assert_eq!(model["label"], "cytosol");
        assert_eq!(model["log_transform"], true);
        assert_eq!(model["curves"]["x"].as_array().unwrap().len(), 1000);

        // raw pixel counts: the smallest object is 4x4
        let histogram: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(hist_path).unwrap()).unwrap();
        assert_eq!(histogram["histogram"]["edges"][0], 16.0);
        assert_eq!(histogram["histogram"]["n_values"], 24);
    }

    #[test]
    fn test_json_sink_writes_empty_histogram() {
        let dir = tempdir().unwrap();
        let mut sink = JsonQcSink::new(dir.path()).unwrap();

        let config = SizeFilterConfig::new("nucleus").with_threshold(1.0, 10.0);
        let (_, result) = filter_size(&LabelMask::zeros(&[8, 8]).unwrap(), &config).unwrap();
        sink.write_size_filter(&SizeFilterQc::from_result(&result).unwrap())
            .unwrap();

        let record: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("nucleus_histogram.json")).unwrap(),
        )
        .unwrap();
        assert!(record["histogram"].is_null());
        assert_eq!(record["profile"]["n_objects"], 0);
    }

    #[test]
    fn test_json_sink_skips_model_for_explicit_threshold() {
        let dir = tempdir().unwrap();
        let mut sink = JsonQcSink::new(dir.path()).unwrap();

        let config = SizeFilterConfig::new("nucleus").with_threshold(10.0, 40.0);
        let (_, result) = filter_size(&varied_mask(), &config).unwrap();
        sink.write_size_filter(&SizeFilterQc::from_result(&result).unwrap())
            .unwrap();

        assert!(dir.path().join("nucleus_histogram.json").exists());
        assert!(!dir.path().join("nucleus_mixture_model.json").exists());
    }

    #[test]
    fn test_json_sink_writes_classification() {
        let dir = tempdir().unwrap();
        let mut sink = JsonQcSink::new(dir.path()).unwrap();
        let map = LabelMask::from(ndarray::array![[0u32, 1], [2, 2]]);
        sink.write_classification("nucleus", &map).unwrap();

        let record: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("nucleus_classification.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(record["shape"], serde_json::json!([2, 2]));
        assert_eq!(record["values"], serde_json::json!([0, 1, 2, 2]));
    }
}

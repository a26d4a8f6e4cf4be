//! Pipeline runner for composing and executing mask filtering steps.

use crate::data::LabelMask;
use crate::error::{Result, SegError};
use crate::filter::{MatchConfig, MatchResult, NucleusCytosolMatcher, SizeFilter, SizeFilterConfig, SizeFilterResult};
use crate::qc::{match_classification, size_filter_classification, JsonQcSink, QcSink, SizeFilterQc};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A step in the filtering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineStep {
    /// Size-filter the nucleus mask.
    FilterNucleusSize(SizeFilterConfig),
    /// Size-filter the cytosol mask.
    FilterCytosolSize(SizeFilterConfig),
    /// Match nucleus and cytosol ids.
    MatchIds(MatchConfig),
}

impl PipelineStep {
    /// Short name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStep::FilterNucleusSize(_) => "filter_nucleus_size",
            PipelineStep::FilterCytosolSize(_) => "filter_cytosol_size",
            PipelineStep::MatchIds(_) => "match_ids",
        }
    }
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
    /// Directory for JSON QC output; none disables QC.
    #[serde(default)]
    pub qc_directory: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(SegError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(SegError::from)
    }
}

/// Masks and results produced by a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub nucleus: LabelMask,
    pub cytosol: Option<LabelMask>,
    /// Size-filter results in step order.
    pub size_results: Vec<SizeFilterResult>,
    pub match_result: Option<MatchResult>,
}

impl std::fmt::Display for PipelineOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for result in &self.size_results {
            write!(f, "{}", result)?;
        }
        if let Some(result) = &self.match_result {
            write!(f, "{}", result)?;
        }
        Ok(())
    }
}

/// Builder for constructing and running filtering pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
    qc_directory: Option<PathBuf>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
            qc_directory: None,
        }
    }

    /// Size-filter both masks with default settings, then match them.
    pub fn standard() -> Self {
        Self::new()
            .name("standard")
            .filter_nucleus_size(SizeFilterConfig::new("nucleus"))
            .filter_cytosol_size(SizeFilterConfig::new("cytosol"))
            .match_ids(MatchConfig::default())
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
            qc_directory: config.qc_directory.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Write JSON QC output into `directory`.
    pub fn qc_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.qc_directory = Some(directory.into());
        self
    }

    pub fn filter_nucleus_size(mut self, config: SizeFilterConfig) -> Self {
        self.steps.push(PipelineStep::FilterNucleusSize(config));
        self
    }

    pub fn filter_cytosol_size(mut self, config: SizeFilterConfig) -> Self {
        self.steps.push(PipelineStep::FilterCytosolSize(config));
        self
    }

    pub fn match_ids(mut self, config: MatchConfig) -> Self {
        self.steps.push(PipelineStep::MatchIds(config));
        self
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Convert to a serializable config.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
            qc_directory: self.qc_directory.clone(),
        }
    }

    /// Run the pipeline, writing QC output if a directory was configured.
    pub fn run(&self, nucleus: &LabelMask, cytosol: Option<&LabelMask>) -> Result<PipelineOutput> {
        match &self.qc_directory {
            Some(directory) => {
                let mut sink = JsonQcSink::new(directory)?;
                self.run_with_sink(nucleus, cytosol, Some(&mut sink as &mut dyn QcSink))
            }
            None => self.run_with_sink(nucleus, cytosol, None),
        }
    }

    /// Run the pipeline, sending QC output to `sink`.
    pub fn run_with_sink(
        &self,
        nucleus: &LabelMask,
        cytosol: Option<&LabelMask>,
        mut sink: Option<&mut dyn QcSink>,
    ) -> Result<PipelineOutput> {
        if let Some(cytosol) = cytosol {
            nucleus.ensure_same_shape(cytosol)?;
        }
        info!("Running pipeline '{}' with {} steps", self.name, self.steps.len());

        let mut state = PipelineState {
            nucleus: nucleus.clone(),
            cytosol: cytosol.cloned(),
            size_results: Vec::new(),
            match_result: None,
        };

        for (i, step) in self.steps.iter().enumerate() {
            let step_sink = sink.as_mut().map(|s| &mut **s as &mut dyn QcSink);
            state = state.apply(step, step_sink).map_err(|e| {
                SegError::Pipeline(format!("Step {} ({}) failed: {}", i + 1, step.name(), e))
            })?;
        }

        Ok(state.finalize())
    }
}

struct PipelineState {
    nucleus: LabelMask,
    cytosol: Option<LabelMask>,
    size_results: Vec<SizeFilterResult>,
    match_result: Option<MatchResult>,
}

impl PipelineState {
    fn apply(mut self, step: &PipelineStep, sink: Option<&mut dyn QcSink>) -> Result<Self> {
        match step {
            PipelineStep::FilterNucleusSize(config) => {
                let (filtered, result) = size_filter(&self.nucleus, config, sink)?;
                self.nucleus = filtered;
                self.size_results.push(result);
            }
            PipelineStep::FilterCytosolSize(config) => {
                let cytosol = self.cytosol.as_ref().ok_or_else(|| {
                    SegError::Pipeline("Cytosol size filtering requires a cytosol mask".to_string())
                })?;
                let (filtered, result) = size_filter(cytosol, config, sink)?;
                self.cytosol = Some(filtered);
                self.size_results.push(result);
            }
            PipelineStep::MatchIds(config) => {
                let cytosol = self.cytosol.as_ref().ok_or_else(|| {
                    SegError::Pipeline("Matching requires a cytosol mask".to_string())
                })?;
                let result = NucleusCytosolMatcher::new(config.clone())?.evaluate(&self.nucleus, cytosol)?;
                if let Some(sink) = sink {
                    let (nucleus_map, cytosol_map) = match_classification(&self.nucleus, cytosol, &result);
                    sink.write_classification("nucleus_match", &nucleus_map)?;
                    sink.write_classification("cytosol_match", &cytosol_map)?;
                }
                self.nucleus = result.nucleus_mask.clone();
                self.cytosol = Some(result.cytosol_mask.clone());
                self.match_result = Some(result);
            }
        }
        Ok(self)
    }

    fn finalize(self) -> PipelineOutput {
        PipelineOutput {
            nucleus: self.nucleus,
            cytosol: self.cytosol,
            size_results: self.size_results,
            match_result: self.match_result,
        }
    }
}

fn size_filter(
    mask: &LabelMask,
    config: &SizeFilterConfig,
    sink: Option<&mut dyn QcSink>,
) -> Result<(LabelMask, SizeFilterResult)> {
    let result = SizeFilter::new(config.clone())?.evaluate(mask)?;
    if let Some(sink) = sink {
        sink.write_size_filter(&SizeFilterQc::from_result(&result)?)?;
        sink.write_classification(
            &format!("{}_size", result.label),
            &size_filter_classification(mask, &result),
        )?;
    }
    Ok((result.apply(mask), result))
}

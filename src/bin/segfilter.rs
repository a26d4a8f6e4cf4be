//! segfilter - segmentation mask filtering CLI
//!
//! Command-line interface for size filtering and nucleus/cytosol matching of
//! TSV label masks.

use clap::{Parser, Subcommand, ValueEnum};
use composable_segfilter::data::{LabelMask, ObjectPopulation};
use composable_segfilter::error::Result;
use composable_segfilter::filter::{MatchConfig, NucleusCytosolMatcher, SizeFilter, SizeFilterConfig};
use composable_segfilter::model::PopulationPolicy;
use composable_segfilter::pipeline::{Pipeline, PipelineConfig};
use composable_segfilter::qc::{profile_object_sizes, JsonQcSink, QcSink, SizeFilterQc};
use std::path::PathBuf;

/// CLI-friendly population policy
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliPolicy {
    /// Component with the largest mean
    Largest,
    /// Component with the smallest mean
    Smallest,
    /// Component with the largest weight
    MostCommon,
    /// Component with the smallest weight
    LeastCommon,
}

impl From<CliPolicy> for PopulationPolicy {
    fn from(policy: CliPolicy) -> Self {
        match policy {
            CliPolicy::Largest => PopulationPolicy::Largest,
            CliPolicy::Smallest => PopulationPolicy::Smallest,
            CliPolicy::MostCommon => PopulationPolicy::MostCommon,
            CliPolicy::LeastCommon => PopulationPolicy::LeastCommon,
        }
    }
}

/// Segmentation mask filtering
#[derive(Parser)]
#[command(name = "segfilter")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove objects whose size falls outside a threshold range
    Size {
        /// Path to mask TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the filtered mask TSV
        #[arg(short, long)]
        output: PathBuf,

        /// Mask label used in logs and QC file names
        #[arg(short, long, default_value = "segmask")]
        label: String,

        /// Explicit lower threshold in pixels (requires --upper)
        #[arg(long, requires = "upper")]
        lower: Option<f64>,

        /// Explicit upper threshold in pixels (requires --lower)
        #[arg(long, requires = "lower")]
        upper: Option<f64>,

        /// Number of mixture components
        #[arg(long, default_value = "1")]
        components: usize,

        /// Confidence interval around the selected component
        #[arg(long, default_value = "0.95")]
        confidence: f64,

        /// Which component holds the objects to keep
        #[arg(long, value_enum, default_value = "largest")]
        policy: CliPolicy,

        /// Fit on raw sizes instead of log sizes
        #[arg(long)]
        no_log: bool,

        /// Keep objects below the lower threshold
        #[arg(long)]
        keep_small: bool,

        /// Keep objects above the upper threshold
        #[arg(long)]
        keep_large: bool,

        /// Measure sizes on a mask downsampled by this factor
        #[arg(long)]
        downsample: Option<usize>,

        /// Random seed for the mixture initialization
        #[arg(long, default_value = "0")]
        seed: u64,

        /// Directory for JSON QC output
        #[arg(long)]
        qc_dir: Option<PathBuf>,
    },

    /// Match nucleus and cytosol ids and remove unmatched objects
    Match {
        /// Path to nucleus mask TSV
        #[arg(short, long)]
        nucleus: PathBuf,

        /// Path to cytosol mask TSV
        #[arg(short, long)]
        cytosol: PathBuf,

        /// Output path for the filtered nucleus mask TSV
        #[arg(long)]
        nucleus_out: PathBuf,

        /// Output path for the relabelled cytosol mask TSV
        #[arg(long)]
        cytosol_out: PathBuf,

        /// Minimum share of a nucleus a cytosol must cover
        #[arg(short, long, default_value = "0.5")]
        threshold: f64,

        /// Match on masks downsampled by this factor
        #[arg(long)]
        downsample: Option<usize>,

        /// Skip the opening applied after upscaling
        #[arg(long)]
        no_smoothing: bool,

        /// Radius of the smoothing opening
        #[arg(long, default_value = "7")]
        smoothing_radius: usize,

        /// Output path for the lookup table TSV
        #[arg(long)]
        lookup: Option<PathBuf>,
    },

    /// Run a pipeline from a YAML configuration file
    Run {
        /// Path to pipeline configuration YAML
        #[arg(short = 'p', long)]
        config: PathBuf,

        /// Path to nucleus mask TSV
        #[arg(short, long)]
        nucleus: PathBuf,

        /// Path to cytosol mask TSV
        #[arg(short, long)]
        cytosol: Option<PathBuf>,

        /// Output path for the nucleus mask TSV
        #[arg(long)]
        nucleus_out: PathBuf,

        /// Output path for the cytosol mask TSV
        #[arg(long)]
        cytosol_out: Option<PathBuf>,
    },

    /// Profile object sizes in a mask
    Profile {
        /// Path to mask TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate an example pipeline configuration
    Example {
        /// Output path for the example YAML
        #[arg(short, long, default_value = "pipeline.yaml")]
        output: PathBuf,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Size {
            input,
            output,
            label,
            lower,
            upper,
            components,
            confidence,
            policy,
            no_log,
            keep_small,
            keep_large,
            downsample,
            seed,
            qc_dir,
        } => {
            let mut config = SizeFilterConfig::new(&label)
                .with_components(components)
                .with_confidence_interval(confidence)
                .with_population_policy(policy.into())
                .with_log_transform(!no_log)
                .with_tails(!keep_small, !keep_large)
                .with_seed(seed);
            if let (Some(lower), Some(upper)) = (lower, upper) {
                config = config.with_threshold(lower, upper);
            }
            if let Some(factor) = downsample {
                config = config.with_downsampling(factor);
            }
            cmd_size(&input, &output, config, qc_dir.as_ref())
        }

        Commands::Match {
            nucleus,
            cytosol,
            nucleus_out,
            cytosol_out,
            threshold,
            downsample,
            no_smoothing,
            smoothing_radius,
            lookup,
        } => {
            let mut config = MatchConfig::default()
                .with_overlap_threshold(threshold)
                .with_smoothing(!no_smoothing, smoothing_radius);
            if let Some(factor) = downsample {
                config = config.with_downsampling(factor);
            }
            cmd_match(&nucleus, &cytosol, &nucleus_out, &cytosol_out, lookup.as_ref(), config)
        }

        Commands::Run {
            config,
            nucleus,
            cytosol,
            nucleus_out,
            cytosol_out,
        } => cmd_run(&config, &nucleus, cytosol.as_ref(), &nucleus_out, cytosol_out.as_ref()),

        Commands::Profile { input, format } => cmd_profile(&input, &format),

        Commands::Example { output } => cmd_example(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Size-filter a single mask
fn cmd_size(
    input: &PathBuf,
    output: &PathBuf,
    config: SizeFilterConfig,
    qc_dir: Option<&PathBuf>,
) -> Result<()> {
    eprintln!("Loading mask from {:?}...", input);
    let mask = LabelMask::from_tsv(input)?;

    let mut filter = SizeFilter::new(config)?;
    let filtered = filter.filter(&mask)?;

    if let (Some(dir), Some(result)) = (qc_dir, filter.cached()) {
        let mut sink = JsonQcSink::new(dir)?;
        sink.write_size_filter(&SizeFilterQc::from_result(result)?)?;
        eprintln!("Wrote QC output to {:?}", dir);
    }
    if let Some(result) = filter.cached() {
        eprint!("{}", result);
    }

    eprintln!("Writing filtered mask to {:?}...", output);
    filtered.to_tsv(output)?;
    Ok(())
}

/// Match nucleus and cytosol masks
fn cmd_match(
    nucleus_path: &PathBuf,
    cytosol_path: &PathBuf,
    nucleus_out: &PathBuf,
    cytosol_out: &PathBuf,
    lookup_out: Option<&PathBuf>,
    config: MatchConfig,
) -> Result<()> {
    eprintln!("Loading masks...");
    let nucleus = LabelMask::from_tsv(nucleus_path)?;
    let cytosol = LabelMask::from_tsv(cytosol_path)?;

    let matcher = NucleusCytosolMatcher::new(config)?;
    let result = matcher.evaluate(&nucleus, &cytosol)?;
    eprint!("{}", result);

    result.nucleus_mask.to_tsv(nucleus_out)?;
    result.cytosol_mask.to_tsv(cytosol_out)?;

    if let Some(path) = lookup_out {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record(["nucleus_id", "cytosol_id"])?;
        for (nucleus_id, cytosol_id) in &result.lookup {
            writer.write_record([nucleus_id.to_string(), cytosol_id.to_string()])?;
        }
        writer.flush()?;
        eprintln!("Wrote lookup table to {:?}", path);
    }

    eprintln!("Done! {} cells kept", result.lookup.len());
    Ok(())
}

/// Run a pipeline from configuration
fn cmd_run(
    config_path: &PathBuf,
    nucleus_path: &PathBuf,
    cytosol_path: Option<&PathBuf>,
    nucleus_out: &PathBuf,
    cytosol_out: Option<&PathBuf>,
) -> Result<()> {
    eprintln!("Loading pipeline configuration from {:?}...", config_path);
    let config_str = std::fs::read_to_string(config_path)?;
    let config = PipelineConfig::from_yaml(&config_str)?;

    eprintln!("Loading masks...");
    let nucleus = LabelMask::from_tsv(nucleus_path)?;
    let cytosol = cytosol_path.map(LabelMask::from_tsv).transpose()?;

    eprintln!("Running pipeline '{}'...", config.name);
    let output = Pipeline::from_config(&config).run(&nucleus, cytosol.as_ref())?;
    eprint!("{}", output);

    output.nucleus.to_tsv(nucleus_out)?;
    if let (Some(path), Some(mask)) = (cytosol_out, output.cytosol.as_ref()) {
        mask.to_tsv(path)?;
    }
    eprintln!("Done!");
    Ok(())
}

/// Profile object sizes in a mask
fn cmd_profile(input: &PathBuf, format: &str) -> Result<()> {
    let mask = LabelMask::from_tsv(input)?;
    let profile = profile_object_sizes(&ObjectPopulation::from_mask(&mask));

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&profile)?),
        _ => print!("{}", profile),
    }
    Ok(())
}

/// Write an example pipeline configuration
fn cmd_example(output_path: &PathBuf) -> Result<()> {
    let config = Pipeline::standard()
        .name("example-cleanup")
        .to_config(Some("Size-filter nuclei and cytosols, then match their ids"));
    let yaml = config.to_yaml()?;

    std::fs::write(output_path, &yaml)?;
    eprintln!("Wrote example pipeline to {:?}", output_path);
    eprintln!();
    eprintln!("Contents:");
    println!("{}", yaml);

    Ok(())
}

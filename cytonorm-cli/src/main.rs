use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use cytonorm_rs::{
    BatchContext, CytoNormError, DelimitedFiles, DerivedColumn, EmdTable, EstimationMode,
    EventTable, NormalizationConfig, NormalizationReport, PrefixedSink, ReferenceEstimator,
    StrategyConfig, TableSink, TableSource, compare_frames, normalize, read_data_frame,
};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// CytoNorm - reference-channel normalisation for mass cytometry
#[derive(Parser, Debug)]
#[command(name = "cytonorm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logging and per-file results)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalise event tables against reference channel(s)
    Normalize(NormalizeArgs),
    /// Signed Earth Mover's Distance per marker between two tables
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct NormalizeArgs {
    /// Input files or directories
    #[arg(value_name = "INPUT", required = true)]
    input: Vec<PathBuf>,

    /// Output directory (default: `normalised/` next to each input)
    #[arg(short, long, value_name = "OUTPUT_DIR")]
    output: Option<PathBuf>,

    /// JSON configuration file; replaces the strategy flags below
    #[arg(long, value_name = "CONFIG_JSON")]
    config: Option<PathBuf>,

    /// Correction strategy
    #[arg(short, long, value_enum, default_value = "direct-ratio")]
    strategy: StrategyArg,

    /// Reference column(s), comma-separated
    #[arg(short, long, value_delimiter = ',')]
    reference: Vec<String>,

    /// Columns never transformed, comma-separated
    #[arg(short, long, value_delimiter = ',')]
    ignore: Vec<String>,

    /// Rows whose reference value is not above this are dropped
    #[arg(long, default_value = "0.01")]
    min_signal: f64,

    /// Where mean-ratio pre-normalisation and min-max ranges take their statistics from
    #[arg(short, long, value_enum, default_value = "per-file")]
    mode: ModeArg,

    /// Mean-ratio: divide each reference channel by its mean first
    #[arg(long)]
    pre_normalize: bool,

    /// Mean-ratio: write the row mean to this column
    #[arg(long, value_name = "NAME")]
    derived_column: Option<String>,

    /// Mean-ratio: insertion index of the derived column
    #[arg(long, value_name = "INDEX", requires = "derived_column")]
    derived_index: Option<usize>,

    /// Loess: fraction of events in each local fit
    #[arg(long, default_value = "0.5")]
    span: f64,

    /// Loess: robustifying iterations
    #[arg(long, default_value = "3")]
    iterations: usize,

    /// Loess: interpolation distance
    #[arg(long, default_value = "0.0")]
    delta: f64,

    /// Extension of input files found in directories
    #[arg(long, default_value = "txt")]
    extension: String,

    /// Write a JSON run report here
    #[arg(long, value_name = "REPORT_PATH")]
    report: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// The "from" population
    from: PathBuf,

    /// The "to" population
    to: PathBuf,

    /// Markers to compare, in order (default: every shared column not ignored)
    #[arg(short, long, value_delimiter = ',')]
    markers: Vec<String>,

    /// Columns skipped when markers are chosen automatically
    #[arg(short, long, value_delimiter = ',')]
    ignore: Vec<String>,

    /// Label for the "from" population (default: file stem)
    #[arg(long)]
    from_label: Option<String>,

    /// Label for the "to" population (default: file stem)
    #[arg(long)]
    to_label: Option<String>,

    /// Tab-delimited results table
    #[arg(short, long, value_name = "OUTPUT_TSV")]
    output: PathBuf,

    /// Also write the results as JSON
    #[arg(long, value_name = "JSON_PATH")]
    json: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StrategyArg {
    DirectRatio,
    MeanRatio,
    MedianRatio,
    MinMaxRatio,
    Loess,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    PerFile,
    Batch,
}

impl From<ModeArg> for EstimationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::PerFile => EstimationMode::PerFile,
            ModeArg::Batch => EstimationMode::Batch,
        }
    }
}

impl NormalizeArgs {
    /// The run configuration, from `--config` or from flags
    fn normalization_config(&self) -> Result<NormalizationConfig> {
        if let Some(ref path) = self.config {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: NormalizationConfig = serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            return Ok(config);
        }

        let single_reference = || -> Result<String> {
            match self.reference.as_slice() {
                [one] => Ok(one.clone()),
                [] => bail!("--reference is required"),
                _ => bail!("{:?} takes exactly one reference column", self.strategy),
            }
        };

        let strategy = match self.strategy {
            StrategyArg::DirectRatio => StrategyConfig::DirectRatio {
                reference: single_reference()?,
            },
            StrategyArg::MeanRatio => {
                if self.reference.is_empty() {
                    bail!("--reference is required");
                }
                StrategyConfig::MeanRatio {
                    references: self.reference.clone(),
                    pre_normalize: self.pre_normalize.then(|| self.mode.into()),
                    derived: self.derived_column.as_ref().map(|name| DerivedColumn {
                        name: name.clone(),
                        index: self.derived_index,
                    }),
                }
            }
            StrategyArg::MedianRatio => StrategyConfig::MedianRatio {
                reference: single_reference()?,
            },
            StrategyArg::MinMaxRatio => StrategyConfig::MinMaxRatio {
                reference: single_reference()?,
                mode: self.mode.into(),
            },
            StrategyArg::Loess => StrategyConfig::Loess {
                reference: single_reference()?,
                span: self.span,
                iterations: self.iterations,
                delta: self.delta,
            },
        };

        Ok(NormalizationConfig {
            strategy,
            ignore: self.ignore.clone(),
            min_signal: self.min_signal,
        })
    }
}

/// Result of processing a single file
#[derive(Debug, Serialize)]
struct FileResult {
    filename: String,
    input_path: PathBuf,
    output_path: PathBuf,
    report: Option<NormalizationReport>,
    processing_time_ms: u128,
    error: Option<String>,
    #[serde(skip)]
    configuration_error: bool,
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Read, normalise and write one file
fn process_single_file(
    input_path: &Path,
    source: &DelimitedFiles,
    sink: &PrefixedSink,
    config: &NormalizationConfig,
    context: Option<&BatchContext>,
) -> FileResult {
    let start_time = Instant::now();
    let identifier = input_path.display().to_string();

    let outcome = source.read(&identifier).and_then(|table| {
        let corrected = normalize(&table, config, context)?;
        sink.write(&identifier, &corrected.table)?;
        Ok(corrected.report)
    });

    let (report, error, configuration_error) = match outcome {
        Ok(report) => (Some(report), None, false),
        Err(e) => (None, Some(e.to_string()), e.is_configuration()),
    };

    FileResult {
        filename: file_name(input_path),
        input_path: input_path.to_path_buf(),
        output_path: sink.output_path(&identifier),
        report,
        processing_time_ms: start_time.elapsed().as_millis(),
        error,
        configuration_error,
    }
}

/// Batch pre-pass: read the reference columns of every file
fn estimate_batch_context(
    source: &DelimitedFiles,
    config: &NormalizationConfig,
) -> Result<BatchContext> {
    let references = config.strategy.reference_columns();
    let tables = source
        .paths()
        .par_iter()
        .map(|path| {
            let table = source.read(&path.display().to_string())?;
            table.select(&references)
        })
        .collect::<std::result::Result<Vec<EventTable>, CytoNormError>>()?;
    Ok(ReferenceEstimator::estimate(&tables, &config.strategy)?)
}

fn run_normalize(args: &NormalizeArgs, verbose: bool) -> Result<bool> {
    let start_time = Instant::now();

    let config = args.normalization_config()?;
    config.strategy.validate()?;
    debug!("Configuration: {}", serde_json::to_string(&config)?);

    let source = DelimitedFiles::discover(&args.input, &args.extension)?;
    if source.is_empty() {
        bail!("No .{} files found", args.extension);
    }
    println!("📂 Found {} file(s) to process\n", source.paths().len());

    let sink = match args.output {
        Some(ref dir) => {
            std::fs::create_dir_all(dir)?;
            PrefixedSink::in_dir(dir)
        }
        None => PrefixedSink::beside_inputs(),
    };

    // Statistics must be complete before any file is normalised
    let context = if config.strategy.needs_batch_context() {
        info!("Estimating batch reference statistics ({})", config.strategy);
        Some(Arc::new(estimate_batch_context(&source, &config)?))
    } else {
        None
    };

    let aborted = AtomicBool::new(false);
    let total_files = source.paths().len();
    let results: Vec<FileResult> = source
        .paths()
        .par_iter()
        .enumerate()
        .map(|(idx, input_path)| {
            if aborted.load(Ordering::SeqCst) {
                return FileResult {
                    filename: file_name(input_path),
                    input_path: input_path.clone(),
                    output_path: sink.output_path(&input_path.display().to_string()),
                    report: None,
                    processing_time_ms: 0,
                    error: Some("skipped: run aborted by configuration error".to_string()),
                    configuration_error: false,
                };
            }
            if total_files > 1 {
                info!(
                    "Processing file {}/{}: {}",
                    idx + 1,
                    total_files,
                    file_name(input_path)
                );
            }
            let result =
                process_single_file(input_path, &source, &sink, &config, context.as_deref());
            if result.configuration_error {
                aborted.store(true, Ordering::SeqCst);
            }
            result
        })
        .collect();

    let total_time = start_time.elapsed().as_secs_f64();
    let successful: Vec<&FileResult> = results.iter().filter(|r| r.error.is_none()).collect();
    let failed: Vec<&FileResult> = results.iter().filter(|r| r.error.is_some()).collect();

    println!("\n✅ Normalisation complete ({})", config.strategy);
    println!("   Processed: {} file(s)", results.len());
    println!("   Successful: {}", successful.len());
    if !failed.is_empty() {
        println!("   Failed: {}", failed.len());
    }
    println!("   ⏱️  Total time: {:.2}s\n", total_time);

    if verbose && !successful.is_empty() {
        println!("📊 Results:");
        for result in &successful {
            if let Some(ref report) = result.report {
                println!(
                    "   {}: {} → {} events ({} below threshold, {} non-finite)",
                    result.filename,
                    report.n_events_before,
                    report.n_events_after,
                    report.n_below_threshold,
                    report.n_non_finite
                );
            }
        }
        println!();
    }

    if !failed.is_empty() {
        eprintln!("❌ Errors:");
        for result in &failed {
            if let Some(ref error) = result.error {
                eprintln!("   {}: {}", result.filename, error);
            }
        }
        eprintln!();
    }

    if let Some(ref report_path) = args.report {
        let combined_report = serde_json::json!({
            "configuration": &config,
            "batch_context": context.as_deref(),
            "total_files": results.len(),
            "successful": successful.len(),
            "failed": failed.len(),
            "total_time_seconds": total_time,
            "results": &results,
        });
        std::fs::write(report_path, serde_json::to_string_pretty(&combined_report)?)
            .with_context(|| format!("Failed to write report {}", report_path.display()))?;
        info!("Report written to {}", report_path.display());
    }

    Ok(failed.is_empty())
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

fn run_compare(args: &CompareArgs) -> Result<bool> {
    let from = read_data_frame(&args.from)?;
    let to = read_data_frame(&args.to)?;

    let markers: Vec<String> = if args.markers.is_empty() {
        let to_columns: Vec<String> = to
            .get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        from.get_column_names()
            .into_iter()
            .map(|c| c.to_string())
            .filter(|c| to_columns.contains(c) && !args.ignore.contains(c))
            .collect()
    } else {
        args.markers.clone()
    };
    if markers.is_empty() {
        return Err(anyhow!("No markers shared by both tables"));
    }
    info!("Comparing {} markers", markers.len());

    let from_label = args.from_label.clone().unwrap_or_else(|| stem(&args.from));
    let to_label = args.to_label.clone().unwrap_or_else(|| stem(&args.to));

    let records = match compare_frames(&markers, &from, &to) {
        Ok(records) => records,
        Err(e) if e.is_data_quality() || e.is_configuration() => {
            eprintln!("❌ Comparison aborted: {}", e);
            return Ok(false);
        }
        Err(e) => return Err(e.into()),
    };

    let mut table = EmdTable::new();
    table.push_pair(&from_label, &to_label, records);
    table.write_tsv(&args.output)?;
    if let Some(ref json) = args.json {
        table.write_json(json)?;
    }

    println!("✅ {} markers compared ({} → {})", table.len(), from_label, to_label);
    for row in &table.rows {
        debug!("{}: EMD {:+.4}", row.record.marker, row.record.emd);
    }
    println!("   Results: {}", args.output.display());
    Ok(true)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    println!("🧬 CytoNorm - Mass Cytometry Normalisation");
    println!("==========================================\n");

    let succeeded = match cli.command {
        Commands::Normalize(ref args) => run_normalize(args, cli.verbose)?,
        Commands::Compare(ref args) => run_compare(args)?,
    };

    if !succeeded {
        warn!("Finished with errors");
        std::process::exit(1);
    }

    Ok(())
}

use clap::{Parser, Subcommand, ValueEnum};
use scan_prealign::config::{load_config, Config, ConfigFormat};
use scan_prealign::data::{discover_scans, load_cloud, save_cloud};
use scan_prealign::logging::{self, global_metrics};
use scan_prealign::pipeline::{
    corpus_from_discovered, resolve_intermediate_dir, retain_for_retry, BatchOptions,
    BatchOrchestrator, Checkpoint, CorpusReport, PlyDirectoryWriter, StrategySelector,
};
use scan_prealign::predictor::{format_landmarks, PredictorPool};
use scan_prealign::strategies::{AlignmentStrategy, StrategyRegistry};
use scan_prealign::visualization::{print_ranking, print_record, print_summary};
use scan_prealign::{AlignError, CorpusSummary};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "prealign")]
#[command(about = "Pre-align 3D facial scans and pick the strategy the landmark predictor scores best")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Align a single scan and write the best pre-aligned cloud
    Align {
        /// Strategies in priority order (comma-separated; `hybrid` = anatomical,reference)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Error below which the search stops early
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Write the predicted landmarks here, one `x y z` line each
        #[arg(short, long)]
        landmarks: Option<PathBuf>,

        /// Also write every pre-aligned attempt into this directory
        #[arg(long)]
        intermediate_dir: Option<PathBuf>,

        /// Input scan (PLY or OBJ)
        input: PathBuf,

        /// Output PLY
        output: PathBuf,
    },

    /// Select a strategy for every scan under a corpus directory
    Batch {
        /// Corpus root; sub-directories are categories
        #[arg(short, long)]
        dir: PathBuf,

        /// Strategies in priority order (comma-separated)
        #[arg(short, long)]
        strategy: Option<String>,

        /// A scan succeeds when its chosen error is below this
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Where the JSON report is written
        #[arg(short, long, default_value = "results/report.json")]
        report: PathBuf,

        /// Worker threads (default: one per predictor device)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Stop once this many scans have failed
        #[arg(long)]
        stop_after_failures: Option<usize>,

        /// Persist the partial report every N scans
        #[arg(long)]
        checkpoint_every: Option<usize>,

        /// Also write every pre-aligned attempt into this directory
        #[arg(long)]
        intermediate_dir: Option<PathBuf>,

        /// Only rerun scans that were poor, failed or not processed in this earlier report
        #[arg(long)]
        retry_from: Option<PathBuf>,

        /// Rows shown in the ranking
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Write the default configuration
    Config {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, value_enum, default_value = "json")]
        format: FormatArg,
    },

    /// Summarize a saved batch report
    Stats {
        /// Report written by `batch`
        #[arg(short, long)]
        report: PathBuf,

        /// Rows shown in the ranking
        #[arg(long, default_value = "10")]
        top: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Toml,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Align,
    Batch,
    Other,
}

fn main() {
    let cli = Cli::parse();
    let kind = match cli.command {
        Commands::Align { .. } => CommandKind::Align,
        Commands::Batch { .. } => CommandKind::Batch,
        _ => CommandKind::Other,
    };

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            exit_code_for(kind, &e)
        }
    };
    std::process::exit(code);
}

/// `align`: 2 for I/O, 3 for invalid parameters. `batch`: 2 for anything
/// that stops the run before or during work.
fn exit_code_for(kind: CommandKind, error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<AlignError>() {
        Some(AlignError::Config(_)) if kind == CommandKind::Align => 3,
        Some(AlignError::Predictor(_)) => 1,
        _ => 2,
    }
}

fn run(cli: Cli) -> scan_prealign::Result<i32> {
    if let Commands::Config { output, format } = &cli.command {
        return handle_config(output, *format);
    }

    let mut config = load_config(cli.config.as_deref())?;
    let _guard = logging::init_logging(&config.logging.clone().with_verbosity(cli.verbose))?;

    match cli.command {
        Commands::Align {
            strategy,
            threshold,
            landmarks,
            intermediate_dir,
            input,
            output,
        } => {
            config.pre_align.write_intermediate |= intermediate_dir.is_some();
            let intermediate_dir =
                resolve_intermediate_dir(intermediate_dir, config.pre_align.write_intermediate, &output);
            handle_align(&config, strategy, threshold, landmarks, intermediate_dir, &input, &output)
        }
        Commands::Batch {
            dir,
            strategy,
            threshold,
            report,
            workers,
            stop_after_failures,
            checkpoint_every,
            intermediate_dir,
            retry_from,
            top,
        } => {
            config.pre_align.write_intermediate |= intermediate_dir.is_some();
            let intermediate_dir =
                resolve_intermediate_dir(intermediate_dir, config.pre_align.write_intermediate, &report);
            config.batch.workers = workers.or(config.batch.workers);
            config.batch.stop_after_failures = stop_after_failures.or(config.batch.stop_after_failures);
            config.batch.checkpoint_every = checkpoint_every.or(config.batch.checkpoint_every);
            config.validate().map_err(AlignError::Config)?;
            let batch_run = BatchRun {
                dir,
                strategy,
                threshold,
                report,
                intermediate_dir,
                retry_from,
                top,
            };
            handle_batch(&config, batch_run)
        }
        Commands::Stats { report, top } => handle_stats(&config, &report, top),
        Commands::Config { .. } => Ok(0),
    }
}

fn candidate_names(strategy: Option<String>, config: &Config) -> Vec<String> {
    match strategy {
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
        None => config.selection.candidates.clone(),
    }
}

fn resolve_threshold(threshold: Option<f64>, config: &Config) -> Result<f64, AlignError> {
    let threshold = threshold.unwrap_or(config.selection.threshold);
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(AlignError::config(format!(
            "threshold must be a finite value >= 0, got {}",
            threshold
        )));
    }
    Ok(threshold)
}

fn resolve_candidates(
    strategy: Option<String>,
    config: &Config,
) -> Result<Vec<Arc<dyn AlignmentStrategy>>, AlignError> {
    let registry = StrategyRegistry::from_config(config)?;
    registry.resolve(&candidate_names(strategy, config))
}

fn selector(config: &Config, pool: PredictorPool, intermediate_dir: Option<PathBuf>) -> StrategySelector {
    let selector = StrategySelector::new(Arc::new(pool), config.predictor_config());
    match intermediate_dir {
        Some(dir) => selector.with_writer(Arc::new(PlyDirectoryWriter::new(dir))),
        None => selector,
    }
}

fn handle_align(
    config: &Config,
    strategy: Option<String>,
    threshold: Option<f64>,
    landmarks: Option<PathBuf>,
    intermediate_dir: Option<PathBuf>,
    input: &Path,
    output: &Path,
) -> scan_prealign::Result<i32> {
    let threshold = resolve_threshold(threshold, config)?;
    let candidates = resolve_candidates(strategy, config)?;

    let file_id = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string());
    let cloud = load_cloud(input).map_err(|source| AlignError::Input {
        file_id: file_id.clone(),
        source,
    })?;
    info!(file_id = %file_id, vertices = cloud.len(), "Loaded scan");

    let Some(pool) = PredictorPool::from_settings(&config.predictor) else {
        // nothing to score against: only a single explicit strategy makes sense
        if candidates.len() != 1 || landmarks.is_some() {
            return Err(AlignError::config(
                "choosing between strategies or predicting landmarks needs predictor.program",
            )
            .into());
        }
        let aligned = candidates[0].align(&cloud)?;
        save_cloud(output, aligned.transformed())
            .map_err(|source| AlignError::Input { file_id, source })?;
        println!("Aligned with {} (not scored) -> {}", aligned.strategy_id(), output.display());
        return Ok(0);
    };

    let selection = selector(config, pool, intermediate_dir).select(&file_id, None, &cloud, &candidates, threshold);
    let record = selection
        .record
        .clone()
        .with_tier(config.tiers.classify(selection.record.chosen_error));
    print_record(&record, threshold);

    let Some((aligned, prediction)) = selection.best else {
        warn!(file_id = %file_id, "No strategy produced a score");
        return Ok(1);
    };

    save_cloud(output, aligned.transformed()).map_err(|source| AlignError::Input {
        file_id: file_id.clone(),
        source,
    })?;
    if let Some(path) = landmarks {
        std::fs::write(&path, format_landmarks(prediction.landmarks()))
            .map_err(|e| AlignError::fatal(&path, format!("cannot write landmarks: {}", e)))?;
    }
    if !record.is_success(threshold) {
        warn!(error = prediction.error(), threshold, "Best strategy is above the threshold");
    }
    println!(
        "Aligned with {} (error {:.4}, tier {}) -> {}",
        aligned.strategy_id(),
        prediction.error(),
        record.tier,
        output.display()
    );
    Ok(0)
}

/// Command-line inputs of one `batch` invocation.
struct BatchRun {
    dir: PathBuf,
    strategy: Option<String>,
    threshold: Option<f64>,
    report: PathBuf,
    intermediate_dir: Option<PathBuf>,
    retry_from: Option<PathBuf>,
    top: usize,
}

fn handle_batch(config: &Config, run: BatchRun) -> scan_prealign::Result<i32> {
    let threshold = resolve_threshold(run.threshold, config)?;
    let candidates = resolve_candidates(run.strategy, config)?;
    let pool = PredictorPool::from_settings(&config.predictor)
        .ok_or_else(|| AlignError::config("batch selection needs predictor.program"))?;
    let report_path = run.report.as_path();

    let scans = discover_scans(&run.dir, &config.batch.extensions)?;
    info!(root = %run.dir.display(), scans = scans.len(), "Discovered corpus");
    let mut corpus = corpus_from_discovered(scans);

    if let Some(previous_path) = &run.retry_from {
        let previous = CorpusReport::load(previous_path)?;
        let discovered = corpus.len();
        corpus = retain_for_retry(corpus, &previous, &config.tiers);
        info!(
            previous = %previous_path.display(),
            previous_run = %previous.run_id,
            discovered,
            retrying = corpus.len(),
            "Limiting run to scans that need another attempt"
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("Interrupted, finishing scans in flight...");
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Could not install Ctrl-C handler");
    }

    let options = BatchOptions {
        workers: config.batch.effective_workers(&config.predictor),
        stop_after_failures: config.batch.stop_after_failures,
        checkpoint: Some(Checkpoint {
            path: report_path.to_path_buf(),
            every: config.batch.checkpoint_every,
        }),
        tiers: config.tiers.clone(),
        cancel,
    };

    let orchestrator = BatchOrchestrator::new(selector(config, pool, run.intermediate_dir), options);
    let report = orchestrator.run(&corpus, &candidates, threshold)?;

    for strategy in &report.candidates {
        if let Some(metrics) = global_metrics().get_strategy_metrics(strategy) {
            info!(
                strategy = %strategy,
                predictions = metrics.predictions,
                successful = metrics.successful_predictions,
                mean_ms = metrics.prediction_stats.as_ref().map(|s| s.mean_ms),
                p95_ms = metrics.prediction_stats.as_ref().map(|s| s.p95_ms),
                "Predictor timing"
            );
        }
    }

    let summary = CorpusSummary::from_report(&report, &config.tiers);
    print_summary(&summary);
    print_ranking(&summary, run.top);
    println!("Report saved to {}", report_path.display());
    Ok(report.exit_code())
}

fn handle_config(output: &Path, format: FormatArg) -> scan_prealign::Result<i32> {
    let format = match format {
        FormatArg::Json => ConfigFormat::Json,
        FormatArg::Toml => ConfigFormat::Toml,
    };
    Config::default()
        .save_to_file(output, format)
        .map_err(|e| AlignError::fatal(output, format!("cannot write config: {:#}", e)))?;
    println!("Default configuration written to {}", output.display());
    Ok(0)
}

fn handle_stats(config: &Config, report_path: &Path, top: usize) -> scan_prealign::Result<i32> {
    let report = CorpusReport::load(report_path)?;
    let summary = CorpusSummary::from_report(&report, &config.tiers);
    print_summary(&summary);
    print_ranking(&summary, top);
    Ok(0)
}

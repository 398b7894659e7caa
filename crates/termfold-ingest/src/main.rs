//! termfold report loader.
//!
//! Streams a search-terms report, keeps the top three clicked items for every
//! (department, search term, search-frequency rank), and bulk-loads the
//! resulting rows into ClickHouse.
//!
//! # Usage
//!
//! ```bash
//! # Load a weekly report
//! termfold-ingest -i report.json.gz --week-start 2025-07-06 \
//!     --clickhouse-url http://clickhouse:8123
//!
//! # Small batches for servers with tight payload limits
//! termfold-ingest -i report.json.gz --week-start 2025-07-06 --batch-size 50
//!
//! # Offline run to a local file, with metrics
//! termfold-ingest -i report.json --week-start 2025-07-06 \
//!     --output-file rows.ndjson --metrics-port 9091
//! ```
//!
//! # Exit Codes
//!
//! - `0` - every batch delivered
//! - `1` - the run failed (a checkpoint is left for the next attempt)
//! - `2` - finished, but some batches were written to spill files instead

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use termfold_core::RunMetadata;
use termfold_core::metrics::{init_metrics, start_metrics_server};
use termfold_ingest::pipeline::{DEFAULT_BATCH_SIZE, DEFAULT_QUEUE_CAPACITY};
use termfold_ingest::runner::DEFAULT_CHECKPOINT_INTERVAL;
use termfold_ingest::source::DEFAULT_ARRAY_FIELD;
use termfold_ingest::{
    ClickHouseConfig, ClickHouseSink, Compression, NdjsonSink, Pipeline, PipelineConfig,
    ReportConfig, RowSink, RunOutcome, RunSummary,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Load a search-terms report into ClickHouse.
#[derive(Parser, Debug, Clone)]
#[command(name = "termfold-ingest")]
#[command(about = "Aggregate a search-terms report and bulk-load it into ClickHouse")]
#[command(version)]
struct Args {
    /// Input report (.json, .json.gz or .json.zst)
    #[arg(short, long)]
    input: PathBuf,

    /// Report identifier stamped on every row (defaults to the input file name)
    #[arg(long, env = "TERMFOLD_REPORT_ID")]
    report_id: Option<String>,

    /// Marketplace identifier
    #[arg(long, env = "TERMFOLD_MARKETPLACE_ID")]
    marketplace_id: Option<String>,

    /// First day of the reporting week (YYYY-MM-DD)
    #[arg(long)]
    week_start: NaiveDate,

    /// Last day of the reporting week (defaults to week start + 6 days)
    #[arg(long)]
    week_end: Option<NaiveDate>,

    /// Maximum rows per insert
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Records between checkpoints (0 disables periodic checkpoints)
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_INTERVAL)]
    checkpoint_interval: u64,

    /// Batches queued ahead of the upload worker
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// Top-level field holding the record array
    #[arg(long, default_value = DEFAULT_ARRAY_FIELD)]
    array_field: String,

    /// Input compression: auto, none, gzip or zstd
    #[arg(long, default_value = "auto")]
    compression: Compression,

    /// Directory for failed-batch spill files (defaults to next to the input)
    #[arg(long)]
    spill_dir: Option<PathBuf>,

    /// Ignore an existing checkpoint and start over
    #[arg(long)]
    no_resume: bool,

    /// Log progress every N records
    #[arg(long, default_value = "10000")]
    progress_interval: u64,

    /// Write rows to this NDJSON file instead of ClickHouse
    #[arg(long)]
    output_file: Option<PathBuf>,

    /// ClickHouse URL
    #[arg(long, env = "CLICKHOUSE_URL", default_value = "http://localhost:8123")]
    clickhouse_url: String,

    /// ClickHouse database name
    #[arg(long, env = "CLICKHOUSE_DATABASE", default_value = "amazon_analytics")]
    clickhouse_db: String,

    /// ClickHouse table name
    #[arg(long, env = "CLICKHOUSE_TABLE", default_value = "search_terms")]
    clickhouse_table: String,

    /// ClickHouse user
    #[arg(long, env = "CLICKHOUSE_USER")]
    clickhouse_user: Option<String>,

    /// ClickHouse password
    #[arg(long, env = "CLICKHOUSE_PASSWORD", hide_env_values = true)]
    clickhouse_password: Option<String>,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,

    /// Log filter (e.g. "info" or "termfold_ingest=debug")
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level)
                .with_context(|| format!("Invalid log filter: {}", args.log_level))?,
        )
        .init();

    if args.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(args.metrics_port, metrics_handle).await?;
    }

    // The pipeline blocks (file I/O, upload worker joins); keep it off the async workers
    let summary = tokio::task::spawn_blocking(move || run(&args))
        .await
        .context("Pipeline task panicked")??;

    match summary.outcome() {
        RunOutcome::Clean => Ok(ExitCode::SUCCESS),
        RunOutcome::Degraded { spilled_batches } => {
            warn!(
                "Finished with {} batch(es) in spill files; replay them to complete the load",
                spilled_batches
            );
            Ok(ExitCode::from(2))
        }
    }
}

fn run(args: &Args) -> Result<RunSummary> {
    let config = build_config(args)?;
    let sink = build_sink(args)?;

    let summary = Pipeline::new(config, sink)
        .run()
        .with_context(|| format!("Failed to load {}", args.input.display()))?;

    print_summary(args, &summary);
    Ok(summary)
}

fn build_config(args: &Args) -> Result<PipelineConfig> {
    let report_id = match &args.report_id {
        Some(id) => id.clone(),
        None => default_report_id(&args.input).with_context(|| {
            format!(
                "Cannot derive a report id from {}; pass --report-id",
                args.input.display()
            )
        })?,
    };

    let metadata = RunMetadata::new(
        report_id,
        args.marketplace_id.clone(),
        args.week_start,
        args.week_end,
    )?;

    let mut config = PipelineConfig::new(&args.input, metadata);
    config.source = ReportConfig {
        input: args.input.clone(),
        array_field: args.array_field.clone(),
        compression: args.compression,
        progress_interval: args.progress_interval,
    };
    config.batch_size = args.batch_size;
    config.checkpoint_interval = args.checkpoint_interval;
    config.queue_capacity = args.queue_capacity;
    config.resume = !args.no_resume;
    if let Some(dir) = &args.spill_dir {
        config.spill_dir = dir.clone();
    }

    Ok(config)
}

fn build_sink(args: &Args) -> Result<Box<dyn RowSink>> {
    if let Some(path) = &args.output_file {
        let sink = NdjsonSink::create(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        return Ok(Box::new(sink));
    }

    let sink = ClickHouseSink::new(ClickHouseConfig {
        url: args.clickhouse_url.clone(),
        database: args.clickhouse_db.clone(),
        table: args.clickhouse_table.clone(),
        user: args.clickhouse_user.clone(),
        password: args.clickhouse_password.clone(),
    })?;

    match sink.health_check() {
        Ok(true) => info!("ClickHouse is reachable at {}", args.clickhouse_url),
        Ok(false) => warn!("ClickHouse health check returned an unexpected value"),
        Err(e) => warn!(
            "ClickHouse health check failed ({}); failed batches will be spilled",
            e
        ),
    }

    Ok(Box::new(sink))
}

/// Input file name without compression and `.json` extensions.
fn default_report_id(input: &Path) -> Option<String> {
    let mut name = input.file_name()?.to_str()?;
    for suffix in [".gz", ".zst", ".zstd"] {
        if let Some(stripped) = name.strip_suffix(suffix) {
            name = stripped;
            break;
        }
    }
    let name = name.strip_suffix(".json").unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}

fn print_summary(args: &Args, summary: &RunSummary) {
    println!("\n══════════════════════════════════════════════════════════════════");
    println!("SUMMARY");
    println!("══════════════════════════════════════════════════════════════════\n");

    println!("Input:        {}", args.input.display());
    match &args.output_file {
        Some(path) => println!("Output:       {}", path.display()),
        None => println!(
            "ClickHouse:   {} ({}.{})",
            args.clickhouse_url, args.clickhouse_db, args.clickhouse_table
        ),
    }
    if let Some(phase) = summary.resumed_from {
        println!("Resumed from: {} checkpoint", phase);
    }
    println!();

    if let Some(source) = &summary.source {
        println!("Objects seen:      {:>12}", source.objects_seen);
        println!("Records:           {:>12}", source.records_emitted);
        println!("Dropped:           {:>12}", source.records_dropped);
    }
    println!("Keys flushed:      {:>12}", summary.keys_flushed);
    println!("Checkpoints saved: {:>12}", summary.checkpoints_saved);
    println!();

    let upload = &summary.upload;
    println!("╭─────────────────────────────────────────────────────────────────╮");
    println!("│ UPLOAD                                                          │");
    println!("├─────────────────────────────────────────────────────────────────┤");
    println!("│ Batches sent:        {:>15}                            │", upload.batches_sent);
    println!("│ Rows delivered:      {:>15}                            │", upload.rows_delivered);
    println!("│ Rows rejected:       {:>15}                            │", upload.rows_rejected);
    println!("│ Batches spilled:     {:>15}                            │", upload.batches_spilled);
    println!("│ Rows spilled:        {:>15}                            │", upload.rows_spilled);
    println!("╰─────────────────────────────────────────────────────────────────╯");

    for path in &upload.spill_files {
        println!("  spilled: {}", path.display());
    }

    println!();
    println!("Elapsed time:      {:>12.2?}", summary.elapsed);
    if let Some(source) = &summary.source
        && source.records_emitted > 0
    {
        let rate = source.records_emitted as f64 / summary.elapsed.as_secs_f64().max(f64::EPSILON);
        println!("Throughput:        {:>12.0} records/sec", rate);
    }
    println!();
}

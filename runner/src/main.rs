use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use generator::synthetic::{generate, GeneratorConfig, SyntheticWorld};
use log::{info, warn};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::WorkflowConfig;
use workflow::runner::Runner;
use xch4core::grid::LandMask;
use xch4core::ingest;
use xch4core::processing::CancellationFlag;
use xch4core::telemetry::MetricsRecorder;

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Multi-sensor XCH4 fusion workflow driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    /// JSON-lines file of satellite soundings
    #[arg(long)]
    soundings: Option<PathBuf>,
    /// JSON-lines file of reference station observations
    #[arg(long)]
    stations: Option<PathBuf>,
    /// Generate a seeded synthetic world instead of reading input files
    #[arg(long, default_value_t = false)]
    synthetic: bool,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    #[arg(long, default_value = "2021-01-01")]
    start: NaiveDate,
    #[arg(long, default_value = "2021-01-07")]
    end: NaiveDate,
    #[arg(long, default_value_t = 4)]
    holdout_every: usize,
    /// Override the spatial collocation tolerance, degrees
    #[arg(long)]
    spatial_tolerance: Option<f64>,
    #[arg(long)]
    min_collocations: Option<usize>,
    /// Where to write the JSON run report
    #[arg(long, default_value = "tools/data/run_report.json")]
    report: PathBuf,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.start, args.end, args.holdout_every)
    }
    .with_overrides(args.spatial_tolerance, args.min_collocations);

    let metrics = MetricsRecorder::new();
    let world = load_world(&args, &workflow_config, &metrics)?;
    let runner = Runner::new(workflow_config)?;

    let cancel = CancellationFlag::new();
    spawn_interrupt_watcher(cancel.clone())?;

    let report = runner.execute(
        &world.soundings,
        &world.stations,
        Arc::new(LandMask::all_land()),
        &cancel,
        &metrics,
        |monthly| {
            println!(
                "Month {}-{:02} -> days {}, max days fused per cell {}",
                monthly.year(),
                monthly.month(),
                monthly.days().len(),
                monthly.max_days_fused()
            );
        },
    )?;

    for period in &report.periods {
        for sensor in &period.sensors {
            println!(
                "{} {} -> usable {}, skill {}",
                period.period,
                sensor.sensor,
                sensor.usable,
                sensor
                    .skill
                    .map(|s| format!("R2 {:.3} RMSE {:.2} ppb", s.r2, s.rmse))
                    .unwrap_or_else(|| "n/a".into())
            );
        }
    }
    println!(
        "Run -> days fused {}, failed {}, records rejected {}{}",
        report.fused_days(),
        report.failed_days(),
        report.ingestion.total_rejected(),
        if report.cancelled { " (cancelled)" } else { "" }
    );

    if let Some(parent) = args.report.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating report directory {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&report).context("serializing run report")?;
    fs::write(&args.report, json).with_context(|| format!("writing run report {}", args.report.display()))?;
    info!("run report written to {}", args.report.display());

    Ok(())
}

fn load_world(args: &Args, config: &WorkflowConfig, metrics: &MetricsRecorder) -> anyhow::Result<SyntheticWorld> {
    if args.synthetic {
        return generate(&GeneratorConfig {
            seed: args.seed,
            start: config.start,
            end: config.end,
            ..GeneratorConfig::default()
        });
    }
    let (Some(soundings_path), Some(stations_path)) = (&args.soundings, &args.stations) else {
        anyhow::bail!("either --synthetic or both --soundings and --stations are required");
    };
    let soundings = File::open(soundings_path)
        .with_context(|| format!("opening soundings {}", soundings_path.display()))?;
    let soundings = ingest::read_soundings(BufReader::new(soundings), metrics)
        .with_context(|| format!("reading soundings {}", soundings_path.display()))?;
    let stations = File::open(stations_path)
        .with_context(|| format!("opening stations {}", stations_path.display()))?;
    let stations = ingest::read_stations(BufReader::new(stations), metrics)
        .with_context(|| format!("reading stations {}", stations_path.display()))?;
    Ok(SyntheticWorld { soundings, stations })
}

/// Raises `cancel` on Ctrl+C. Days already running finish; the rest are skipped.
fn spawn_interrupt_watcher(cancel: CancellationFlag) -> anyhow::Result<()> {
    let runtime = TokioBuilder::new_current_thread()
        .enable_all()
        .build()
        .context("creating runtime for signal handling")?;
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            let outcome = runtime.block_on(signal::ctrl_c());
            match outcome {
                Ok(()) => {
                    warn!("interrupt received; finishing running days");
                    cancel.cancel();
                }
                Err(err) => warn!("could not listen for Ctrl+C: {}", err),
            }
        })
        .context("spawning signal watcher")?;
    Ok(())
}

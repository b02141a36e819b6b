//! `convert`: raw instrument files to SCC artifacts.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Duration;
use clap::Args;
use lidar_common::{Atmosphere, StationRegistry};
use scc_convert::{
    create_provider, discover_raw_files, ArtifactBuilder, ConversionReport, ConvertOptions,
    Converter, OverlapPolicy, TimeSpec, WindowOutcome,
};
use tracing::info;

use crate::config::PipelineConfig;

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Raw file or directory of raw files (searched recursively)
    pub input: PathBuf,

    /// Directory for the SCC files
    pub output_dir: PathBuf,

    /// Station code or name from stations.yaml
    #[arg(short, long)]
    pub station: String,

    /// First boundary: YYYY-MM-DD_HH:MM, YYYY-MM-DD, HH:MM or XX:MM
    #[arg(long)]
    pub start: Option<TimeSpec>,

    /// Last boundary, same forms as --start
    #[arg(long)]
    pub end: Option<TimeSpec>,

    /// Window length in minutes; one window for the whole range if omitted
    #[arg(short, long)]
    pub interval: Option<i64>,

    /// Round the resolved start down to the full hour
    #[arg(long)]
    pub round: bool,

    /// automatic, radiosonde, cloudnet or standard
    #[arg(long, default_value = "radiosonde")]
    pub atmosphere: Atmosphere,

    /// Windows built in parallel (default: number of CPUs)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Let later files win when overlapping files disagree
    #[arg(long)]
    pub last_write_wins: bool,

    /// Do not write polarisation calibration files
    #[arg(long)]
    pub no_calibration: bool,
}

/// Run a conversion. Returns false when any window failed.
pub async fn run(
    args: ConvertArgs,
    config: &PipelineConfig,
    registry: &StationRegistry,
    cancel: Arc<AtomicBool>,
) -> Result<bool> {
    let station = Arc::new(registry.get(&args.station)?.clone());
    let provider = if args.atmosphere.requires_sounding() {
        Some(
            create_provider(&config.radiosonde, &station)
                .context("Failed to set up the radiosonde provider")?,
        )
    } else {
        None
    };

    let files = if args.input.is_dir() {
        discover_raw_files(&args.input)?
    } else {
        vec![args.input.clone()]
    };

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    let mut options = ConvertOptions {
        start: args.start,
        end: args.end,
        interval: args.interval.map(Duration::minutes),
        round_to_hour: args.round,
        overlap_policy: if args.last_write_wins {
            OverlapPolicy::LastWriteWins
        } else {
            OverlapPolicy::Reject
        },
        output_dir: args.output_dir.clone(),
        calibration: !args.no_calibration,
        ..Default::default()
    };
    if let Some(workers) = args.workers {
        options.workers = workers;
    }

    info!(
        station = %station.code,
        atmosphere = %args.atmosphere,
        files = files.len(),
        "Converting raw files"
    );

    let converter = Converter::new(ArtifactBuilder::new(station, args.atmosphere, provider), options);
    let report = tokio::task::spawn_blocking(move || converter.run(&files, &cancel))
        .await
        .context("Conversion task panicked")??;

    print_report(&report);

    Ok(!report.has_failures())
}

fn print_report(report: &ConversionReport) {
    for result in &report.windows {
        match &result.outcome {
            WindowOutcome::Written(artifact) => {
                println!("{}  written    {}", result.window, artifact.path.display())
            }
            WindowOutcome::Unchanged(artifact) => {
                println!("{}  unchanged  {}", result.window, artifact.path.display())
            }
            WindowOutcome::Empty => println!("{}  empty", result.window),
            WindowOutcome::Failed(e) => println!("{}  FAILED     {}", result.window, e),
            WindowOutcome::Cancelled => println!("{}  cancelled", result.window),
        }
    }
    println!(
        "{} written, {} unchanged, {} empty, {} failed, {} cancelled",
        report.written(),
        report.unchanged(),
        report.empty(),
        report.failed(),
        report.cancelled()
    );

    for result in &report.calibrations {
        match &result.outcome {
            WindowOutcome::Written(artifact) | WindowOutcome::Unchanged(artifact) => {
                println!("{}  calibration {}", result.period, artifact.path.display())
            }
            WindowOutcome::Failed(e) => {
                println!("{}  calibration {} FAILED  {}", result.period, result.id, e)
            }
            WindowOutcome::Empty | WindowOutcome::Cancelled => {}
        }
    }
    if !report.calibrations.is_empty() {
        println!(
            "{} calibration files, {} failed",
            report.calibration_files().count(),
            report.calibration_failed()
        );
    }
}

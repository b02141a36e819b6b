//! SCC pipeline command-line tool.
//!
//! Converts raw lidar files into SCC measurement files and manages them on
//! the Single Calculus Chain:
//! - `convert` slices raw files into windows and writes SCC files
//! - `upload`, `search`, `download`, `delete`, `rerun` and `process` talk to SCC
//! - `stations` lists the configured stations
//!
//! Credentials are read from `SCC_USERNAME`/`SCC_PASSWORD` (and optionally
//! `SCC_HTTP_USERNAME`/`SCC_HTTP_PASSWORD`), also from a `.env` file.

mod config;
mod convert;
mod lists;
mod remote;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::PipelineConfig;
use convert::ConvertArgs;
use remote::{Mutation, SccArgs};

#[derive(Parser, Debug)]
#[command(name = "scc-pipeline")]
#[command(about = "Convert lidar measurements to SCC files and manage them on SCC")]
struct Args {
    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Configuration directory (contains stations.yaml)
    #[arg(long, env = "SCC_CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert raw files into SCC measurement files
    Convert(ConvertArgs),

    /// Upload SCC files
    Upload {
        /// SCC file or directory of SCC files
        path: PathBuf,
        /// Write the assigned measurement IDs to this CSV file
        #[arg(long)]
        list: Option<PathBuf>,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// Search measurements between two dates (inclusive)
    Search {
        start: NaiveDate,
        end: NaiveDate,
        /// Station code or name
        #[arg(long)]
        station: Option<String>,
        /// Also write the results to a CSV file
        #[arg(long)]
        to_csv: Option<PathBuf>,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// Download the products of processed measurements
    Download {
        output_dir: PathBuf,
        /// List file written by `upload --list`
        #[arg(long)]
        list: Option<PathBuf>,
        /// Measurement ID, may be repeated
        #[arg(long = "id")]
        ids: Vec<String>,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// Delete measurements from SCC
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// Ask SCC to process measurements again
    Rerun {
        #[arg(required = true)]
        ids: Vec<String>,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// Upload one file, wait for processing and download the products
    Process {
        file: PathBuf,
        output_dir: PathBuf,
        #[command(flatten)]
        scc: SccArgs,
    },

    /// List the configured stations
    Stations,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);
    if args.log_json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    let config = PipelineConfig::load(&args.config_dir)?;
    let registry = config.registry()?;

    // Ctrl+C stops new windows and requests; in-flight work finishes.
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let cancel = CancellationToken::new();
    {
        let flag = Arc::clone(&cancel_flag);
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing in-flight work");
                flag.store(true, Ordering::SeqCst);
                token.cancel();
            }
        });
    }

    let success = match args.command {
        Command::Convert(convert_args) => {
            convert::run(convert_args, &config, &registry, cancel_flag).await?
        }
        Command::Stations => {
            println!("{:<6} {:<20} {:>9} {:>9} {:>7}  {}", "Code", "Name", "Lat", "Lon", "Alt", "Systems (day/night)");
            for station in registry.iter() {
                println!(
                    "{:<6} {:<20} {:>9.4} {:>9.4} {:>7.1}  {}/{}",
                    station.code,
                    station.name,
                    station.latitude,
                    station.longitude,
                    station.altitude,
                    station.daytime_configuration,
                    station.nighttime_configuration
                );
            }
            true
        }
        Command::Upload { path, list, scc } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::upload(&client, &path, list.as_deref(), &cancel).await;
            remote::disconnect(&client).await;
            result?
        }
        Command::Search {
            start,
            end,
            station,
            to_csv,
            scc,
        } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::search(
                &client,
                &registry,
                start,
                end,
                station.as_deref(),
                to_csv.as_deref(),
            )
            .await;
            remote::disconnect(&client).await;
            result?
        }
        Command::Download {
            output_dir,
            list,
            ids,
            scc,
        } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::download(&client, &output_dir, list.as_deref(), &ids, &cancel).await;
            remote::disconnect(&client).await;
            result?
        }
        Command::Delete { ids, scc } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::mutate(&client, Mutation::Delete, &ids, &cancel).await;
            remote::disconnect(&client).await;
            result?
        }
        Command::Rerun { ids, scc } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::mutate(&client, Mutation::Rerun, &ids, &cancel).await;
            remote::disconnect(&client).await;
            result?
        }
        Command::Process {
            file,
            output_dir,
            scc,
        } => {
            let client = remote::connect(&scc, &config.scc).await?;
            let result = remote::process(&client, &file, &output_dir).await;
            remote::disconnect(&client).await;
            result?
        }
    };

    if success {
        info!("Done");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!("Finished with failures");
        Ok(ExitCode::FAILURE)
    }
}

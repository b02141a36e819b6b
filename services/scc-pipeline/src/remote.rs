//! Commands that talk to SCC.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::Args;
use lidar_common::StationRegistry;
use scc_client::{Credentials, Page, SccClient, SearchCriteria, Session};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SccSettings;
use crate::lists::{read_list, write_list, write_search_csv, ListEntry};

/// Credentials and endpoint, normally taken from the environment or `.env`.
#[derive(Args, Debug, Clone)]
pub struct SccArgs {
    #[arg(long, env = "SCC_USERNAME")]
    pub username: Option<String>,

    #[arg(long, env = "SCC_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// HTTP basic-auth user guarding the site
    #[arg(long, env = "SCC_HTTP_USERNAME")]
    pub http_username: Option<String>,

    #[arg(long, env = "SCC_HTTP_PASSWORD", hide_env_values = true)]
    pub http_password: Option<String>,

    /// Overrides `scc.base_url` from stations.yaml
    #[arg(long, env = "SCC_BASE_URL")]
    pub base_url: Option<String>,
}

impl SccArgs {
    fn credentials(&self) -> Result<Credentials> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            bail!("SCC credentials missing: set SCC_USERNAME and SCC_PASSWORD (or pass --username/--password)");
        };
        let credentials = Credentials::new(username, password);
        Ok(match (&self.http_username, &self.http_password) {
            (Some(user), Some(pass)) => credentials.with_http_auth(user, pass),
            _ => credentials,
        })
    }
}

/// Open a session and log in.
pub async fn connect(args: &SccArgs, settings: &SccSettings) -> Result<SccClient> {
    let credentials = args.credentials()?;
    let config = settings.client_config(args.base_url.as_deref());
    let session = Session::new(&config, credentials.http_auth())?;
    let client = SccClient::new(Arc::new(session), config);
    client
        .login(&credentials)
        .await
        .context("Login to SCC failed")?;
    Ok(client)
}

/// Close the session; failures only warrant a warning.
pub async fn disconnect(client: &SccClient) {
    if let Err(e) = client.logout().await {
        warn!(error = %e, "Logout failed");
    }
}

/// SCC files in `path`: the file itself, or every `*.nc` in the directory
/// except sounding and calibration files.
pub fn collect_artifacts(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("Failed to read {}", path.display()))? {
        let file = entry?.path();
        let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(".nc") && !name.starts_with("rs_") && !name.starts_with("calibration_") {
            files.push(file);
        }
    }
    files.sort();
    Ok(files)
}

pub async fn upload(
    client: &SccClient,
    path: &Path,
    list: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<bool> {
    let files = collect_artifacts(path)?;
    if files.is_empty() {
        bail!("No SCC files found in {}", path.display());
    }
    info!(files = files.len(), "Uploading");

    let outcomes = client.upload_all(&files, cancel).await;
    let mut entries = Vec::new();
    let mut failed = 0;
    for outcome in outcomes {
        match outcome.result {
            Ok(id) => {
                println!("Uploaded {} as {}", outcome.path.display(), id);
                entries.push(ListEntry {
                    filename: outcome.path,
                    measurement_id: id,
                    products_downloaded: false,
                });
            }
            Err(e) => {
                failed += 1;
                println!("FAILED {}: {}", outcome.path.display(), e);
            }
        }
    }

    if let Some(list) = list {
        write_list(list, &entries)?;
        println!("Wrote IDs to {}", list.display());
    }
    println!("{} uploaded, {} failed", entries.len(), failed);
    Ok(failed == 0)
}

pub async fn search(
    client: &SccClient,
    registry: &StationRegistry,
    start: NaiveDate,
    end: NaiveDate,
    station: Option<&str>,
    to_csv: Option<&Path>,
) -> Result<bool> {
    if end < start {
        bail!("End date {} is before start date {}", end, start);
    }

    let mut criteria = SearchCriteria::new(start, end);
    if let Some(station) = station {
        // Accept configured names as well as raw SCC station ids.
        let code = registry
            .get(station)
            .map(|s| s.code.to_lowercase())
            .unwrap_or_else(|_| station.to_string());
        criteria = criteria.station(code);
    }

    let measurements = client.search(&criteria, Page::default()).await?;

    println!(
        "{:<24} {:<8} {:<20} {:<20} {:<11} {}",
        "ID", "Station", "Start", "Stop", "State", "Products"
    );
    for m in &measurements {
        let products: Vec<String> = m.available_products().iter().map(|p| p.to_string()).collect();
        println!(
            "{:<24} {:<8} {:<20} {:<20} {:<11} {}",
            m.id,
            m.station_id.as_deref().unwrap_or("-"),
            m.start.as_deref().unwrap_or("-"),
            m.stop.as_deref().unwrap_or("-"),
            m.state(),
            products.join(",")
        );
    }
    println!("{} measurements", measurements.len());

    if let Some(path) = to_csv {
        write_search_csv(path, &measurements)?;
        println!("Wrote {}", path.display());
    }
    Ok(true)
}

pub async fn download(
    client: &SccClient,
    output_dir: &Path,
    list: Option<&Path>,
    ids: &[String],
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut entries = match list {
        Some(path) => read_list(path)?,
        None => Vec::new(),
    };
    let mut wanted: Vec<String> = entries
        .iter()
        .filter(|e| !e.products_downloaded && !e.measurement_id.is_empty())
        .map(|e| e.measurement_id.clone())
        .collect();
    wanted.extend(ids.iter().cloned());
    if wanted.is_empty() && entries.is_empty() {
        bail!("Either a list file or at least one --id must be given");
    }

    let mut failed = 0;
    for id in &wanted {
        if cancel.is_cancelled() {
            warn!("Cancelled, not downloading remaining measurements");
            failed += 1;
            break;
        }
        match client.download(id, output_dir).await {
            Ok(files) => {
                println!("Downloaded {} files for {}", files.len(), id);
                for entry in entries.iter_mut().filter(|e| &e.measurement_id == id) {
                    entry.products_downloaded = true;
                }
            }
            Err(e) => {
                failed += 1;
                println!("FAILED {}: {}", id, e);
            }
        }
    }

    if let Some(path) = list {
        write_list(path, &entries)?;
    }
    println!("{} downloaded, {} failed", wanted.len().saturating_sub(failed), failed);
    Ok(failed == 0)
}

/// Which per-id mutation to run.
#[derive(Debug, Clone, Copy)]
pub enum Mutation {
    Delete,
    Rerun,
}

pub async fn mutate(
    client: &SccClient,
    mutation: Mutation,
    ids: &[String],
    cancel: &CancellationToken,
) -> Result<bool> {
    let mut failed = 0;
    for id in ids {
        if cancel.is_cancelled() {
            warn!("Cancelled, skipping remaining measurements");
            failed += 1;
            break;
        }
        let result = match mutation {
            Mutation::Delete => client.delete(id).await.map(|_| "deleted".to_string()),
            Mutation::Rerun => client
                .rerun(id)
                .await
                .map(|state| format!("rerun requested, now {}", state)),
        };
        match result {
            Ok(message) => println!("{}: {}", id, message),
            Err(e) => {
                failed += 1;
                println!("FAILED {}: {}", id, e);
            }
        }
    }
    Ok(failed == 0)
}

pub async fn process(client: &SccClient, file: &Path, output_dir: &Path) -> Result<bool> {
    let (id, files) = client
        .process(file, output_dir)
        .await
        .with_context(|| format!("Processing {} failed", file.display()))?;
    println!("Processed {} as {}, downloaded {} files", file.display(), id, files.len());
    for file in files {
        println!("  {}", file.display());
    }
    Ok(true)
}

//! claimgrid CLI - batch claim submission against a shared grid.
//!
//! ```text
//! main() -> load config -> open store -> ClaimService -> JSON on stdout
//! ```
//!
//! Every subcommand writes one JSON document to stdout. Logs go to
//! `<data dir>/claimgrid/logs/claimgrid.log` (`./.claimgrid/logs/` without a
//! data dir), or stderr when the file cannot be opened.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use claimgrid_config::ClaimGridConfig;
use claimgrid_engine::{
    ClaimService, CoordinatorError, ServiceError, apply_mask, load_bitmap, open_coordinator,
    open_grid,
};

#[derive(Parser)]
#[command(name = "claimgrid")]
#[command(about = "Allocate grid cells to claim identifiers under a capacity cap")]
struct Cli {
    /// Config file (defaults to $CLAIMGRID_CONFIG or the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the grid database and seed every cell
    Init,
    /// Report which identifiers are new and which already hold a cell
    Preview {
        /// Newline/comma separated identifiers, or `-` for stdin
        input: PathBuf,
    },
    /// Allocate cells for the identifiers
    Confirm {
        /// Newline/comma separated identifiers, or `-` for stdin
        input: PathBuf,
    },
    /// Show claims used against the capacity limit
    Status,
    /// Project a bitmap onto cell mask flags
    Mask {
        /// Image file (png or jpeg)
        image: PathBuf,
        /// Pixels with luma below this value are masked
        #[arg(long)]
        threshold: Option<u8>,
    },
    /// Check that filled cells and claims pair up one to one
    Audit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = match &cli.config {
        Some(path) => ClaimGridConfig::load_from(path)?,
        None => ClaimGridConfig::load()?,
    };

    match cli.command {
        Commands::Init => init(&config),
        Commands::Preview { input } => preview(&config, &input).await,
        Commands::Confirm { input } => confirm(&config, &input).await,
        Commands::Status => status(&config).await,
        Commands::Mask { image, threshold } => mask(&config, &image, threshold),
        Commands::Audit => audit(&config),
    }
}

fn init(config: &ClaimGridConfig) -> Result<()> {
    let store = open_grid(config)?;
    print_json(&json!({
        "size": store.size(),
        "cells": store.cells().len(),
        "capacity": store.capacity_status()?,
    }))
}

async fn preview(config: &ClaimGridConfig, input: &Path) -> Result<()> {
    let raw = read_input(input)?;
    let service = ClaimService::new(open_coordinator(config)?);
    let report = service.preview(raw).await?;
    print_json(&report)
}

async fn confirm(config: &ClaimGridConfig, input: &Path) -> Result<()> {
    let raw = read_input(input)?;
    let service = ClaimService::new(open_coordinator(config)?);
    match service.confirm_raw(raw).await {
        Ok(outcome) => print_json(&outcome),
        Err(ServiceError::Coordinator(CoordinatorError::Allocate(err))) => {
            // Earlier candidates stay committed; report them before failing.
            if let Some(partial) = err.partial() {
                print_json(partial)?;
            }
            Err(anyhow::Error::new(err).context("allocation stopped early"))
        }
        Err(err) => Err(err.into()),
    }
}

async fn status(config: &ClaimGridConfig) -> Result<()> {
    let service = ClaimService::new(open_coordinator(config)?);
    print_json(&service.capacity_status().await?)
}

fn mask(config: &ClaimGridConfig, image: &Path, threshold: Option<u8>) -> Result<()> {
    let bitmap = load_bitmap(image)?;
    let store = open_grid(config)?;
    let threshold = threshold.unwrap_or(config.mask.threshold);
    let marked = apply_mask(&store, &bitmap, threshold).context("failed to write mask")?;
    print_json(&json!({ "marked": marked, "threshold": threshold }))
}

fn audit(config: &ClaimGridConfig) -> Result<()> {
    let store = open_grid(config)?;
    let report = store.audit()?;
    print_json(&report)?;
    if !report.is_consistent() {
        bail!("{} audit violation(s) found", report.violations.len());
    }
    Ok(())
}

fn read_input(input: &Path) -> Result<String> {
    if input == Path::new("-") {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read identifiers from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(input)
        .with_context(|| format!("failed to read identifiers from {}", input.display()))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

fn init_tracing() {
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));

    match open_log_file(&log_dir()) {
        Ok((path, file)) => {
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
            tracing::debug!(path = %path.display(), "logging to file");
        }
        Err(err) => {
            // stdout carries the JSON result.
            registry.with(fmt::layer().with_writer(io::stderr)).init();
            tracing::warn!("{err:#}");
        }
    }
}

fn log_dir() -> PathBuf {
    dirs::data_dir()
        .map_or_else(|| PathBuf::from(".claimgrid"), |dir| dir.join("claimgrid"))
        .join("logs")
}

fn open_log_file(dir: &Path) -> Result<(PathBuf, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create log dir {}", dir.display()))?;
    let path = dir.join("claimgrid.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;
    Ok((path, file))
}

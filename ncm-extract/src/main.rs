//! ncm-extract - NetEase Cloud Music playlist capture tool
//!
//! Command-line front end for the capture engine:
//! - `decode`: decrypt one EAPI body and print the JSON inside
//! - `replay`: feed a directory of saved captures through the engine and
//!   write the reconstructed playlists

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ncm_common::config::{default_config_path, load_toml_config, RootFolderInitializer, TomlConfig};
use tracing::{info, warn};

use ncm_extract::config::{CliOverrides, ExtractSettings, MODULE_NAME};
use ncm_extract::db::SqliteCatalog;
use ncm_extract::replay::decode_argument;
use ncm_extract::{CaptureEngine, CaptureReplay, CatalogLookup};

/// Command-line arguments for ncm-extract
#[derive(Parser, Debug)]
#[command(name = "ncm-extract")]
#[command(about = "Reconstruct NetEase Cloud Music playlists from captured EAPI traffic")]
#[command(version)]
struct Args {
    /// Config file (default: <config_dir>/ncm/ncm-extract.toml)
    #[arg(long, global = true, env = "NCM_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for playlists, catalog and captures
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    /// Directory playlist files are written to
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Catalog database file
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Run without the track catalog
    #[arg(long, global = true, conflicts_with = "catalog")]
    no_catalog: bool,

    /// Only save these playlist ids (repeatable)
    #[arg(long = "target-id", global = true)]
    target_ids: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decrypt one EAPI body (hex, `params=<HEX>`, or @file) and print its JSON
    Decode {
        /// Body text, or @path to read it from a file
        input: String,
    },

    /// Replay saved captures (post_*.json) through the engine
    Replay {
        /// Capture directory (default: <root>/debug)
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(|| default_config_path(MODULE_NAME));
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TomlConfig::default(),
    };

    init_tracing(&toml_config)?;

    info!(
        "Starting ncm-extract v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match args.command {
        Command::Decode { ref input } => decode(input),
        Command::Replay { ref dir } => {
            let cli = CliOverrides {
                root_folder: args.root_folder.clone(),
                output_dir: args.output_dir.clone(),
                catalog: args.catalog.clone(),
                no_catalog: args.no_catalog,
                target_ids: args.target_ids.clone(),
            };
            let settings = ExtractSettings::resolve(&toml_config, config_path.as_deref(), &cli)?;
            replay(&settings, dir.clone()).await
        }
    }
}

/// Install the fmt subscriber: `RUST_LOG` wins over the configured level
fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log level")?;

    match &config.logging.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn decode(input: &str) -> Result<()> {
    let decoded = decode_argument(input)?;
    if let Some(url) = &decoded.url {
        info!("Request url: {}", url);
    }
    println!("{}", serde_json::to_string_pretty(&decoded.document)?);
    Ok(())
}

async fn replay(settings: &ExtractSettings, dir: Option<PathBuf>) -> Result<()> {
    let initializer = RootFolderInitializer::new(settings.root_folder.clone());
    let dir = dir.unwrap_or_else(|| initializer.captures_path());

    let catalog: Option<Arc<dyn CatalogLookup>> = match &settings.catalog_path {
        Some(path) => match SqliteCatalog::open(path).await {
            Ok(catalog) => {
                info!("Catalog: {}", path.display());
                Some(Arc::new(catalog))
            }
            Err(e) => {
                warn!("{}, continuing without catalog", e);
                None
            }
        },
        None => None,
    };

    let engine = CaptureEngine::from_settings(settings, catalog);
    info!("Output directory: {}", settings.output_dir.display());

    let summary = CaptureReplay::new(&dir).replay(&engine).await?;
    let status = engine.status().await;
    if status.store.pending_shells > 0 || status.store.unassigned_details > 0 {
        warn!(
            pending_shells = status.store.pending_shells,
            unassigned_details = status.store.unassigned_details,
            "Replay ended with unmatched fragments"
        );
    }
    engine.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

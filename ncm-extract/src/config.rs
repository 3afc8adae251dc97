//! Configuration resolution for ncm-extract
//!
//! Combines command-line overrides, environment, the TOML file and compiled
//! defaults into the settings the engine runs with.
//!
//! **Priority:** CLI → ENV (root folder only) → TOML → default

use crate::error::ExtractResult;
use ncm_common::config::{
    CorrelationConfig, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Module name used for the config file and root folder resolution
pub const MODULE_NAME: &str = "ncm-extract";

/// Values given on the command line; `None` means not given
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub catalog: Option<PathBuf>,
    pub no_catalog: bool,
    pub target_ids: Vec<String>,
}

/// Fully resolved runtime settings
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSettings {
    pub root_folder: PathBuf,
    pub output_dir: PathBuf,
    /// Catalog database file; `None` disables the catalog
    pub catalog_path: Option<PathBuf>,
    pub catalog_timeout: Duration,
    pub correlation: CorrelationConfig,
    /// Playlist ids to persist; empty persists everything
    pub target_ids: Vec<String>,
}

impl ExtractSettings {
    /// Resolve settings from a loaded TOML config plus CLI overrides
    pub fn resolve(toml_config: &TomlConfig, config_path: Option<&Path>, cli: &CliOverrides) -> ExtractResult<Self> {
        let mut resolver = RootFolderResolver::new(MODULE_NAME);
        if let Some(path) = config_path {
            resolver = resolver.with_config_path(path.to_path_buf());
        }
        let root_folder = resolver.resolve_with_cli(cli.root_folder.as_deref());
        let initializer = RootFolderInitializer::new(root_folder.clone());

        let output_dir = resolve_path(
            "output directory",
            cli.output_dir.as_ref(),
            toml_config.output_dir.as_ref(),
            || initializer.playlists_path(),
        );

        let catalog_path = if cli.no_catalog {
            info!("Catalog disabled on command line");
            None
        } else if cli.catalog.is_none() && !toml_config.catalog.enabled {
            info!("Catalog disabled in config");
            None
        } else {
            Some(resolve_path(
                "catalog database",
                cli.catalog.as_ref(),
                toml_config.catalog.database.as_ref(),
                || initializer.catalog_path(),
            ))
        };

        let target_ids = if cli.target_ids.is_empty() {
            toml_config.target_ids.clone()
        } else {
            if !toml_config.target_ids.is_empty() {
                warn!("target_ids given on command line and in config; using command line");
            }
            cli.target_ids.clone()
        };

        toml_config.correlation.validate()?;

        Ok(Self {
            root_folder,
            output_dir,
            catalog_path,
            catalog_timeout: Duration::from_millis(toml_config.catalog.timeout_ms),
            correlation: toml_config.correlation.clone(),
            target_ids,
        })
    }
}

fn resolve_path(
    what: &str,
    cli: Option<&PathBuf>,
    toml: Option<&PathBuf>,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let (Some(_), Some(_)) = (cli, toml) {
        warn!("{} set on command line and in config; using command line", what);
    }
    if let Some(path) = cli {
        info!("Using {} from command line: {}", what, path.display());
        return path.clone();
    }
    if let Some(path) = toml {
        info!("Using {} from config: {}", what, path.display());
        return path.clone();
    }
    let path = default();
    info!("Using default {}: {}", what, path.display());
    path
}

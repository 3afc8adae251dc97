//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`NCM_ROOT_FOLDER`, then `NCM_ROOT`)
//! 3. TOML config file (`root_folder`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file never stops startup: a warning is logged and
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary root folder environment variable
pub const ENV_ROOT_FOLDER: &str = "NCM_ROOT_FOLDER";
/// Alternative root folder environment variable
pub const ENV_ROOT: &str = "NCM_ROOT";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set ("trace".."error")
    pub level: String,
    /// Optional log file path
    pub log_file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: None,
        }
    }
}

const MAX_WINDOW_SECS: u64 = 86_400;

/// Correlation tunables
///
/// The defaults are heuristics, not protocol constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// How long a pending fragment may wait for its partner (seconds)
    pub window_secs: u64,
    /// Maximum relative length difference between cached and requested id lists
    pub length_tolerance: f64,
    /// Minimum positional match score for identity correlation (exclusive)
    pub match_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_secs: 30,
            length_tolerance: 0.10,
            match_threshold: 0.85,
        }
    }
}

impl CorrelationConfig {
    /// Window as a chrono duration (capped at one day)
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs.min(MAX_WINDOW_SECS) as i64)
    }

    /// Reject values that would make matching meaningless
    pub fn validate(&self) -> Result<()> {
        if self.window_secs == 0 {
            return Err(Error::Config("correlation.window_secs must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.length_tolerance) {
            return Err(Error::Config(format!(
                "correlation.length_tolerance must be in [0, 1), got {}",
                self.length_tolerance
            )));
        }
        if !(0.0..1.0).contains(&self.match_threshold) {
            return Err(Error::Config(format!(
                "correlation.match_threshold must be in [0, 1), got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }
}

/// Local track catalog section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Use the catalog for gap filling
    pub enabled: bool,
    /// Database file (defaults to `<root>/ncm_catalog.db`)
    pub database: Option<PathBuf>,
    /// Lookup latency cap in milliseconds
    pub timeout_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            database: None,
            timeout_ms: 3000,
        }
    }
}

/// TOML configuration file contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    /// Where `playlist_<id>.json` files go (defaults to `<root>/playlists`)
    pub output_dir: Option<PathBuf>,
    /// Playlist ids to persist; empty means all
    pub target_ids: Vec<String>,
    pub logging: LoggingConfig,
    pub correlation: CorrelationConfig,
    pub catalog: CatalogConfig,
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/ncm
            dirs::data_local_dir()
                .map(|d| d.join("ncm"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/ncm"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("ncm"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/ncm"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("ncm"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\ncm"))
        } else {
            PathBuf::from("./ncm_data")
        };

        Self {
            root_folder,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

/// Default config file path for a module: `<config_dir>/ncm/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ncm").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file
///
/// A missing file yields defaults with a warning. A file that exists but
/// does not parse is an error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
    config.correlation.validate()?;

    #[cfg(unix)]
    if check_toml_permissions_loose(path).unwrap_or(false) {
        warn!("Config file {} is readable by other users", path.display());
    }

    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write a TOML config atomically (temp file + rename)
///
/// On Unix the file is created with 0600 permissions.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    if let Err(e) = std::fs::write(&tmp_path, content.as_bytes()) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

/// True when group or other users have any access to the file
#[cfg(unix)]
pub fn check_toml_permissions_loose(path: &Path) -> Result<bool> {
    use std::os::unix::fs::PermissionsExt;
    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o077 != 0)
}

/// Root folder resolution (CLI → ENV → TOML → compiled default)
pub struct RootFolderResolver {
    module_name: String,
    config_path: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            config_path: default_config_path(module_name),
        }
    }

    /// Use an explicit config file instead of the platform default
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    /// Resolve without a command-line override
    pub fn resolve(&self) -> PathBuf {
        self.resolve_with_cli(None)
    }

    pub fn resolve_with_cli(&self, cli_arg: Option<&Path>) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        // Priority 2: Environment variables
        for var in [ENV_ROOT_FOLDER, ENV_ROOT] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(config_path) = &self.config_path {
            if config_path.exists() {
                match load_toml_config(config_path) {
                    Ok(config) => {
                        if let Some(root) = config.root_folder {
                            return root;
                        }
                    }
                    Err(e) => warn!(
                        module = %self.module_name,
                        "Ignoring unreadable config {}: {}",
                        config_path.display(),
                        e
                    ),
                }
            }
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and derives standard paths inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            debug!("Created root folder {}", self.root_folder.display());
        }
        Ok(())
    }

    /// Default output directory for merged playlists
    pub fn playlists_path(&self) -> PathBuf {
        self.root_folder.join("playlists")
    }

    /// Default local track catalog database
    pub fn catalog_path(&self) -> PathBuf {
        self.root_folder.join("ncm_catalog.db")
    }

    /// Default capture directory used by replay
    pub fn captures_path(&self) -> PathBuf {
        self.root_folder.join("debug")
    }
}

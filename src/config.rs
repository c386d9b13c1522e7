//! Configuration module for the folder watcher.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.treewatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TREEWATCH_` and use double
//! underscores to separate nested levels:
//! - `TREEWATCH_SCHEDULER__DEBOUNCE_MS=250` sets `scheduler.debounce_ms`
//! - `TREEWATCH_STORE__ROOT=/srv/content` sets `store.root`
//! - `TREEWATCH_URL_SCHEME=content` sets `url_scheme`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::extract::{DEFAULT_ARTIFACT_PATTERN, DEFAULT_CONFIG_PATTERN};
use crate::watcher::{FolderSpec, RootSpec};

const CONFIG_DIR: &str = ".treewatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TREEWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Scheme prefixed onto every resource identity
    #[serde(default = "default_url_scheme")]
    pub url_scheme: String,

    /// Content store location
    #[serde(default)]
    pub store: StoreConfig,

    /// Rescan debouncing
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Extractor order and name patterns
    #[serde(default)]
    pub extractors: ExtractorConfig,

    /// Automatic folder discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Explicitly watched folders
    #[serde(default)]
    pub folders: Vec<FolderSpec>,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StoreConfig {
    /// Directory mapped onto the content tree root
    #[serde(default = "default_store_root")]
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Quiet period before a burst of changes triggers a scan
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Longest a change may wait for a scan during a continuous burst
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// How often the run loop polls the debouncer
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ExtractorConfig {
    /// Extractors to consult, first match wins
    #[serde(default = "default_extractor_order")]
    pub order: Vec<String>,

    /// Name pattern for artifact leaves
    #[serde(default = "default_artifact_pattern")]
    pub artifact_pattern: String,

    /// Name pattern for configuration nodes
    #[serde(default = "default_config_pattern")]
    pub config_pattern: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DiscoveryConfig {
    /// Search roots for folders to watch
    #[serde(default = "default_false")]
    pub enabled: bool,

    /// Folder name pattern
    #[serde(default = "default_folder_pattern")]
    pub folder_pattern: String,

    /// Roots to search, each with the priority given to its folders
    #[serde(default = "default_roots")]
    pub roots: Vec<RootSpec>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `treewatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 { 1 }
fn default_url_scheme() -> String { "treewatch".to_string() }
fn default_store_root() -> PathBuf { PathBuf::from(".") }
fn default_debounce_ms() -> u64 { 500 }
fn default_max_delay_ms() -> u64 { 5_000 }
fn default_tick_ms() -> u64 { 100 }
fn default_false() -> bool { false }
fn default_extractor_order() -> Vec<String> { vec!["config".to_string(), "artifact".to_string()] }
fn default_artifact_pattern() -> String { DEFAULT_ARTIFACT_PATTERN.to_string() }
fn default_config_pattern() -> String { DEFAULT_CONFIG_PATTERN.to_string() }
fn default_folder_pattern() -> String { "^(install|config)$".to_string() }
fn default_log_level() -> String { "warn".to_string() }

fn default_roots() -> Vec<RootSpec> {
    vec![
        RootSpec {
            path: "/libs".to_string(),
            priority: 100,
        },
        RootSpec {
            path: "/apps".to_string(),
            priority: 200,
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            url_scheme: default_url_scheme(),
            store: StoreConfig::default(),
            scheduler: SchedulerConfig::default(),
            extractors: ExtractorConfig::default(),
            discovery: DiscoveryConfig::default(),
            folders: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_store_root(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            max_delay_ms: default_max_delay_ms(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            order: default_extractor_order(),
            artifact_pattern: default_artifact_pattern(),
            config_pattern: default_config_pattern(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder_pattern: default_folder_pattern(),
            roots: default_roots(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace config by looking for .treewatch directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Layer in environment variables with TREEWATCH_ prefix
            // Use double underscore (__) to separate nested levels
            // Single underscore (_) remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".") // Double underscore becomes dot
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the config file by looking for a .treewatch directory
    /// Searches from current directory up to root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Check that a settings file exists and parses
    pub fn check_init() -> Result<(), String> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        if !config_path.exists() {
            return Err("No configuration file found".to_string());
        }

        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| format!("Cannot read configuration file: {e}"))?;
        toml::from_str::<Settings>(&content).map_err(|e| {
            format!(
                "Configuration file is corrupted: {e}\nRun 'treewatch init --force' to regenerate."
            )
        })?;

        Ok(())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        let mut settings = Settings::default();
        settings.folders.push(FolderSpec::new("/install", 100, settings.url_scheme.clone()));
        settings.save(&config_path)?;

        Ok(config_path)
    }
}

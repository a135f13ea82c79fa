//! Configuration for the watch-folder pipeline.
//!
//! Layered the usual way:
//! - Compiled defaults
//! - `.tapewatch/settings.toml` (searched from the current directory upwards)
//! - Environment variables
//!
//! # Environment Variables
//!
//! Variables are prefixed with `TAPEWATCH_` and use double underscores to
//! separate nested levels:
//! - `TAPEWATCH_WORKERS__MAX_WORKERS=4` sets `workers.max_workers`
//! - `TAPEWATCH_QUEUE__MAX_QUEUE_SIZE=50` sets `queue.max_queue_size`
//! - `TAPEWATCH_DEDUP__COOLDOWN_WINDOW_SECS=30` sets `dedup.cooldown_window_secs`
//!
//! Settings are read once at startup. Nothing in the core mutates them.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".tapewatch";
/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TAPEWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub workers: WorkerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dedup: DedupConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Options forwarded to the processing pipeline
    #[serde(default)]
    pub processing: ProcessingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Number of worker threads
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long an idle worker blocks on the queue before checking for shutdown
    #[serde(default = "default_dequeue_timeout_ms")]
    pub dequeue_timeout_ms: u64,

    /// How long `stop` waits for in-flight tasks
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,

    /// Extra attempts for transient I/O failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DedupConfig {
    /// Minimum gap between processing a file and admitting a modification of it
    #[serde(default = "default_cooldown_window_secs")]
    pub cooldown_window_secs: u64,

    /// Tracker size that triggers pruning of settled paths
    #[serde(default = "default_max_tracked_paths")]
    pub max_tracked_paths: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Folders to watch
    #[serde(default)]
    pub folders: Vec<PathBuf>,

    /// Watch subdirectories too
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Accepted file extensions, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OutputConfig {
    /// Subfolder (next to the input) receiving processed files
    #[serde(default = "default_output_folder")]
    pub output_folder: String,

    /// Copy the original aside before processing
    #[serde(default = "default_true")]
    pub backup_original: bool,

    #[serde(default = "default_backup_folder")]
    pub backup_folder: String,

    /// Remove the input after a successful run
    #[serde(default = "default_false")]
    pub auto_delete_original: bool,

    /// Append-only JSON lines file with one record per outcome
    #[serde(default = "default_outcome_log")]
    pub outcome_log: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub preset: MasteringPreset,

    #[serde(default = "default_true")]
    pub remove_artifacts: bool,

    #[serde(default = "default_artifact_intensity")]
    pub artifact_intensity: f32,

    #[serde(default = "default_false")]
    pub separate_stems: bool,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

/// Mastering presets the pipeline recognizes.
#[derive(
    Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum MasteringPreset {
    #[default]
    SpotifyReady,
    YoutubeReady,
    ClubMaster,
    Electronic,
    Synthwave,
    Vaporwave,
    House,
    RadioReady,
    Acoustic,
    Hiphop,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `worker = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_max_workers() -> usize {
    2
}
fn default_dequeue_timeout_ms() -> u64 {
    500
}
fn default_drain_timeout_secs() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    1
}
fn default_max_queue_size() -> usize {
    100
}
fn default_cooldown_window_secs() -> u64 {
    60
}
fn default_max_tracked_paths() -> usize {
    10_000
}
fn default_extensions() -> Vec<String> {
    ["mp3", "wav", "flac", "aiff", "aif", "m4a", "ogg", "opus"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_output_folder() -> String {
    "processed".to_string()
}
fn default_backup_folder() -> String {
    "backups".to_string()
}
fn default_outcome_log() -> PathBuf {
    PathBuf::from("tapewatch-outcomes.jsonl")
}
fn default_artifact_intensity() -> f32 {
    0.5
}
fn default_sample_rate() -> u32 {
    44_100
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            workers: WorkerConfig::default(),
            queue: QueueConfig::default(),
            dedup: DedupConfig::default(),
            watch: WatchConfig::default(),
            output: OutputConfig::default(),
            processing: ProcessingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            dequeue_timeout_ms: default_dequeue_timeout_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown_window_secs: default_cooldown_window_secs(),
            max_tracked_paths: default_max_tracked_paths(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            recursive: true,
            extensions: default_extensions(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_folder: default_output_folder(),
            backup_original: true,
            backup_folder: default_backup_folder(),
            auto_delete_original: false,
            outcome_log: default_outcome_log(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            preset: MasteringPreset::default(),
            remove_artifacts: true,
            artifact_intensity: default_artifact_intensity(),
            separate_stems: false,
            sample_rate: default_sample_rate(),
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

impl WorkerConfig {
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_millis(self.dequeue_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

impl DedupConfig {
    pub fn cooldown_window(&self) -> Duration {
        Duration::from_secs(self.cooldown_window_secs)
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration using a specific settings file.
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore separates nesting, single underscore stays in the name
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find `.tapewatch/settings.toml` from the current directory upwards.
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

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Write a default settings file under `root`.
    pub fn init_config_file(
        root: impl AsRef<Path>,
        force: bool,
    ) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = root.as_ref().join(CONFIG_DIR).join(CONFIG_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(&config_path)?;
        Ok(config_path)
    }

    /// Render as TOML for display.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

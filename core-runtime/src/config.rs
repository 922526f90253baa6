//! # Pipeline Configuration Module
//!
//! Provides the validated configuration tree for the media pipeline.
//!
//! ## Overview
//!
//! `PipelineConfig` mirrors the sections an operator edits (`paths`, `dedup`,
//! `batch`, `syncthing`, `sorter`, `system`, `workflow`). Every section is
//! serde-friendly and falls back to documented defaults, so a partial
//! document deserializes into a complete configuration. Loading and merging
//! files is the host's job; this module only owns the shape, the defaults and
//! fail-fast validation.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::PipelineConfig;
//!
//! let config = PipelineConfig::builder()
//!     .source_dir("/mnt/nas/photos_raw")
//!     .batch_dir("/mnt/nas/syncthing/upload")
//!     .sorted_dir("/mnt/nas/photos_sorted")
//!     .database_path("/var/lib/media-pipeline/db.sqlite")
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! The builder validates the assembled tree and returns `Error::Config` with
//! an actionable message when a value cannot work at runtime (unsupported
//! hash algorithm, malformed naming pattern, empty budget, ...).

use crate::error::{Error, Result};
use crate::pattern::{DatePattern, NamingPattern};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Hash algorithms accepted by the dedup stage.
pub const SUPPORTED_HASH_ALGORITHMS: &[&str] = &["sha256", "sha512", "blake3"];

// ============================================================================
// Enumerated settings
// ============================================================================

/// How files are relocated between pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Rename the file into place
    #[default]
    Move,
    /// Copy the file and keep the original as an archived record
    Copy,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Move => "move",
            TransferMode::Copy => "copy",
        }
    }
}

impl FromStr for TransferMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "move" => Ok(TransferMode::Move),
            "copy" | "copy-archive" => Ok(TransferMode::Copy),
            other => Err(Error::Config(format!("Unknown transfer mode: {}", other))),
        }
    }
}

/// Budget applied when selecting files for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    /// Accumulate files until the byte budget would be exceeded
    #[default]
    Size,
    /// Stop after `max_files` files
    #[serde(alias = "files")]
    Count,
}

impl FromStr for SelectionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "size" => Ok(SelectionMode::Size),
            "count" | "files" => Ok(SelectionMode::Count),
            other => Err(Error::Config(format!("Unknown selection mode: {}", other))),
        }
    }
}

/// What to do with a single file larger than the whole byte budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OversizedPolicy {
    /// Leave it out of every batch and log a warning
    #[default]
    Skip,
    /// Ship it alone in its own batch when nothing else was selected
    Isolate,
}

/// Which member of a duplicate group stays canonical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalPolicy {
    /// The first file fingerprinted wins
    #[default]
    FirstSeen,
    /// The lexicographically smallest path wins while it is still un-batched
    LowestPath,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_dir: PathBuf,
    pub duplicates_dir: PathBuf,
    pub batch_dir: PathBuf,
    pub sorted_dir: PathBuf,
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("/mnt/nas/photos_raw"),
            duplicates_dir: PathBuf::from("/mnt/nas/duplicates"),
            batch_dir: PathBuf::from("/mnt/nas/syncthing/upload"),
            sorted_dir: PathBuf::from("/mnt/nas/photos_sorted"),
            temp_dir: PathBuf::from("/opt/media-pipeline/data/temp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub hash_algorithm: String,
    pub canonical_policy: CanonicalPolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: "sha256".to_string(),
            canonical_policy: CanonicalPolicy::FirstSeen,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_size_gb: f64,
    pub max_files: u64,
    pub selection_mode: SelectionMode,
    pub naming_pattern: String,
    pub allow_parallel: bool,
    pub transfer_mode: TransferMode,
    pub oversized_policy: OversizedPolicy,
}

impl BatchConfig {
    /// Byte budget derived from `max_size_gb` (GiB).
    pub fn max_size_bytes(&self) -> u64 {
        if self.max_size_gb <= 0.0 {
            return 0;
        }
        (self.max_size_gb * GIB) as u64
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size_gb: 15.0,
            max_files: 0,
            selection_mode: SelectionMode::Size,
            naming_pattern: "batch_{index:03d}".to_string(),
            allow_parallel: false,
            transfer_mode: TransferMode::Move,
            oversized_policy: OversizedPolicy::Skip,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncthingConfig {
    pub api_url: String,
    pub api_key: String,
    pub folder_id: String,
    pub device_id: String,
    pub poll_interval_sec: f64,
    pub rescan_delay_sec: f64,
    pub request_timeout_sec: f64,
}

impl SyncthingConfig {
    pub fn folder_id(&self) -> Option<&str> {
        non_empty(&self.folder_id)
    }

    pub fn device_id(&self) -> Option<&str> {
        non_empty(&self.device_id)
    }

    pub fn api_key(&self) -> Option<&str> {
        non_empty(&self.api_key)
    }

    pub fn rescan_delay(&self) -> Duration {
        seconds(self.rescan_delay_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_sec)
    }

    /// Interval between completion polls inside a pipeline run.
    pub fn pipeline_poll_interval(&self) -> Duration {
        seconds((self.poll_interval_sec / 5.0).max(1.0))
    }
}

impl Default for SyncthingConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8384/rest".to_string(),
            api_key: String::new(),
            folder_id: String::new(),
            device_id: String::new(),
            poll_interval_sec: 60.0,
            rescan_delay_sec: 3.0,
            request_timeout_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub folder_pattern: String,
    pub exif_fallback: bool,
    pub transfer_mode: TransferMode,
}

impl Default for SorterConfig {
    fn default() -> Self {
        Self {
            folder_pattern: "{year}/{month:02d}/{day:02d}".to_string(),
            exif_fallback: true,
            transfer_mode: TransferMode::Move,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    pub cleanup_empty_batches: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/media-pipeline/db.sqlite"),
            log_dir: PathBuf::from("/var/log/media-pipeline"),
            cleanup_empty_batches: true,
        }
    }
}

/// Single-step controls for interactive runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSettings {
    pub enabled: bool,
    pub auto_advance: bool,
    pub step_timeout_sec: f64,
    pub history_limit: usize,
}

impl DebugSettings {
    /// Pause timeout, `None` when the run should wait indefinitely.
    pub fn step_timeout(&self) -> Option<Duration> {
        if self.step_timeout_sec > 0.0 {
            Some(seconds(self.step_timeout_sec))
        } else {
            None
        }
    }

    /// Whether a run pauses after each step.
    pub fn pauses(&self) -> bool {
        self.enabled && !self.auto_advance
    }
}

impl Default for DebugSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_advance: false,
            step_timeout_sec: 0.0,
            history_limit: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelaySettings {
    pub syncthing_settle_sec: f64,
    pub post_sync_sec: f64,
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            syncthing_settle_sec: 5.0,
            post_sync_sec: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceSettings {
    pub syncthing_samples: usize,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            syncthing_samples: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub debug: DebugSettings,
    pub delays: DelaySettings,
    pub trace: TraceSettings,
}

impl WorkflowConfig {
    pub fn settle_delay(&self) -> Duration {
        seconds(self.delays.syncthing_settle_sec)
    }

    pub fn post_sync_delay(&self) -> Duration {
        seconds(self.delays.post_sync_sec)
    }

    pub fn trace_samples(&self) -> usize {
        self.trace.syncthing_samples.max(1)
    }
}

// ============================================================================
// Root configuration
// ============================================================================

/// Complete pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub dedup: DedupConfig,
    pub batch: BatchConfig,
    pub syncthing: SyncthingConfig,
    pub sorter: SorterConfig,
    pub system: SystemConfig,
    pub workflow: WorkflowConfig,
}

/// One changed leaf between two configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    /// Dotted key, e.g. `batch.max_size_gb`
    pub key: String,
    /// JSON-encoded previous value (`null` when absent)
    pub old_value: String,
    /// JSON-encoded new value (`null` when removed)
    pub new_value: String,
}

impl PipelineConfig {
    /// Creates a new builder seeded with defaults.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.paths.source_dir.as_os_str().is_empty() {
            return Err(Error::Config("Source directory cannot be empty".to_string()));
        }
        if self.paths.batch_dir.as_os_str().is_empty() {
            return Err(Error::Config("Batch directory cannot be empty".to_string()));
        }
        if self.paths.sorted_dir.as_os_str().is_empty() {
            return Err(Error::Config("Sorted directory cannot be empty".to_string()));
        }

        let algorithm = self.dedup.hash_algorithm.trim().to_lowercase();
        if !SUPPORTED_HASH_ALGORITHMS.contains(&algorithm.as_str()) {
            return Err(Error::Config(format!(
                "Unsupported hash algorithm '{}'. Supported algorithms: {}",
                self.dedup.hash_algorithm,
                SUPPORTED_HASH_ALGORITHMS.join(", ")
            )));
        }

        NamingPattern::parse(&self.batch.naming_pattern)
            .map_err(|e| Error::Config(format!("Invalid batch naming pattern: {}", e)))?;
        DatePattern::parse(&self.sorter.folder_pattern)
            .map_err(|e| Error::Config(format!("Invalid sorter folder pattern: {}", e)))?;

        match self.batch.selection_mode {
            SelectionMode::Size if self.batch.max_size_bytes() == 0 => {
                return Err(Error::Config(
                    "Batch max_size_gb must be greater than 0 in size selection mode".to_string(),
                ));
            }
            SelectionMode::Count if self.batch.max_files == 0 => {
                return Err(Error::Config(
                    "Batch max_files must be greater than 0 in count selection mode".to_string(),
                ));
            }
            _ => {}
        }

        if self.syncthing.api_url.trim().is_empty() {
            return Err(Error::Config("Syncthing api_url cannot be empty".to_string()));
        }

        if self.syncthing.poll_interval_sec < 0.0
            || self.syncthing.rescan_delay_sec < 0.0
            || self.workflow.delays.syncthing_settle_sec < 0.0
            || self.workflow.delays.post_sync_sec < 0.0
            || self.workflow.debug.step_timeout_sec < 0.0
        {
            return Err(Error::Config(
                "Delays, intervals and timeouts cannot be negative".to_string(),
            ));
        }

        Ok(())
    }

    /// Parsed batch naming pattern.
    pub fn naming_pattern(&self) -> Result<NamingPattern> {
        NamingPattern::parse(&self.batch.naming_pattern)
    }

    /// Parsed sorter folder pattern.
    pub fn folder_pattern(&self) -> Result<DatePattern> {
        DatePattern::parse(&self.sorter.folder_pattern)
    }

    /// Lists every leaf that differs between `self` and `other`.
    ///
    /// Keys are dotted paths into the serialized tree; values are JSON
    /// encoded so they can be stored verbatim in the config-change log.
    pub fn diff(&self, other: &PipelineConfig) -> Vec<ConfigChange> {
        let before = flatten(serde_json::to_value(self).unwrap_or(Value::Null));
        let after = flatten(serde_json::to_value(other).unwrap_or(Value::Null));

        let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
        keys.sort();
        keys.dedup();

        keys.into_iter()
            .filter_map(|key| {
                let old = before.get(key).cloned().unwrap_or(Value::Null);
                let new = after.get(key).cloned().unwrap_or(Value::Null);
                if old == new {
                    return None;
                }
                Some(ConfigChange {
                    key: key.clone(),
                    old_value: old.to_string(),
                    new_value: new.to_string(),
                })
            })
            .collect()
    }
}

fn flatten(value: Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(String::new(), value, &mut out);
    out
}

fn flatten_into(prefix: String, value: Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_into(path, child, out);
            }
        }
        other => {
            out.insert(prefix, other);
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`PipelineConfig`] instances.
///
/// Starts from defaults; call [`build()`](PipelineConfigBuilder::build) to
/// validate and obtain the final config.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn source_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.paths.source_dir = path.into();
        self
    }

    pub fn duplicates_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.paths.duplicates_dir = path.into();
        self
    }

    pub fn batch_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.paths.batch_dir = path.into();
        self
    }

    pub fn sorted_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.paths.sorted_dir = path.into();
        self
    }

    pub fn temp_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.paths.temp_dir = path.into();
        self
    }

    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.system.db_path = path.into();
        self
    }

    pub fn hash_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.config.dedup.hash_algorithm = algorithm.into();
        self
    }

    pub fn canonical_policy(mut self, policy: CanonicalPolicy) -> Self {
        self.config.dedup.canonical_policy = policy;
        self
    }

    pub fn max_size_gb(mut self, size: f64) -> Self {
        self.config.batch.max_size_gb = size;
        self
    }

    pub fn max_files(mut self, count: u64) -> Self {
        self.config.batch.max_files = count;
        self
    }

    pub fn selection_mode(mut self, mode: SelectionMode) -> Self {
        self.config.batch.selection_mode = mode;
        self
    }

    pub fn naming_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.batch.naming_pattern = pattern.into();
        self
    }

    pub fn allow_parallel(mut self, allow: bool) -> Self {
        self.config.batch.allow_parallel = allow;
        self
    }

    pub fn batch_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.config.batch.transfer_mode = mode;
        self
    }

    pub fn oversized_policy(mut self, policy: OversizedPolicy) -> Self {
        self.config.batch.oversized_policy = policy;
        self
    }

    pub fn syncthing_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.syncthing.api_url = url.into();
        self
    }

    pub fn syncthing_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.syncthing.api_key = key.into();
        self
    }

    pub fn syncthing_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.config.syncthing.folder_id = folder_id.into();
        self
    }

    pub fn syncthing_device(mut self, device_id: impl Into<String>) -> Self {
        self.config.syncthing.device_id = device_id.into();
        self
    }

    pub fn poll_interval_sec(mut self, seconds: f64) -> Self {
        self.config.syncthing.poll_interval_sec = seconds;
        self
    }

    pub fn rescan_delay_sec(mut self, seconds: f64) -> Self {
        self.config.syncthing.rescan_delay_sec = seconds;
        self
    }

    pub fn folder_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.sorter.folder_pattern = pattern.into();
        self
    }

    pub fn exif_fallback(mut self, enabled: bool) -> Self {
        self.config.sorter.exif_fallback = enabled;
        self
    }

    pub fn sorter_transfer_mode(mut self, mode: TransferMode) -> Self {
        self.config.sorter.transfer_mode = mode;
        self
    }

    pub fn cleanup_empty_batches(mut self, enabled: bool) -> Self {
        self.config.system.cleanup_empty_batches = enabled;
        self
    }

    pub fn debug(mut self, settings: DebugSettings) -> Self {
        self.config.workflow.debug = settings;
        self
    }

    pub fn settle_delay_sec(mut self, seconds: f64) -> Self {
        self.config.workflow.delays.syncthing_settle_sec = seconds;
        self
    }

    pub fn post_sync_delay_sec(mut self, seconds: f64) -> Self {
        self.config.workflow.delays.post_sync_sec = seconds;
        self
    }

    pub fn trace_samples(mut self, samples: usize) -> Self {
        self.config.workflow.trace.syncthing_samples = samples;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// See [`PipelineConfig::validate`].
    pub fn build(self) -> Result<PipelineConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

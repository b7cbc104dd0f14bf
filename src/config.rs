//! Compression configuration.
//!
//! Handles loading, validating, and merging an optional TOML config file. The
//! file only supplies defaults for the CLI. Flags given on the command line
//! override whatever the file says, and the library itself never reads it.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [input]
//! extensions = ["png", "webp", "bmp", "tiff", "gif"]
//! recursive = false         # Descend into subdirectories
//! case_sensitive = false    # Match extensions case-sensitively
//!
//! [strategy]
//! mode = "target-size"      # or "relative-quality"
//! target_size_kb = 250      # Byte budget per image (target-size)
//! min_quality = 70          # Lowest quality ever used
//! max_quality = 98          # Highest quality ever used
//! base_quality = 92         # Quality for an average-sized image (relative-quality)
//! save_best_effort = true   # Keep the smallest encode when the target is unreachable
//!
//! [processing]
//! workers = 8               # Parallel workers (omit for auto = CPU cores)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse. Override just the values you want:
//!
//! ```toml
//! [strategy]
//! target_size_kb = 500
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{Quality, decodable_extensions, is_decodable_extension};
use crate::inventory::{DEFAULT_EXTENSIONS, ScanOptions};
use crate::quality::Strategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Configuration loaded from a TOML file.
///
/// All fields have defaults taken from the long-standing behaviour of the
/// tool. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompressConfig {
    /// Which files are picked up.
    pub input: InputConfig,
    /// How qualities are chosen.
    pub strategy: StrategyConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

impl CompressConfig {
    /// Validate the input section alone: what `scan` needs.
    pub fn validate_input(&self) -> Result<(), ConfigError> {
        if self.input.extensions.is_empty() {
            return Err(ConfigError::Validation(
                "input.extensions must not be empty".into(),
            ));
        }
        if let Some(ext) = self
            .input
            .extensions
            .iter()
            .find(|e| !is_decodable_extension(e))
        {
            return Err(ConfigError::Validation(format!(
                "input.extensions: no decoder for '{ext}' (supported: {})",
                decodable_extensions().join(", ")
            )));
        }
        Ok(())
    }

    /// Validate config values are within acceptable ranges.
    ///
    /// Call after command-line overrides are applied: a file value may only
    /// be valid in combination with a flag.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_input()?;
        let s = &self.strategy;
        for (name, value) in [
            ("min_quality", s.min_quality),
            ("max_quality", s.max_quality),
            ("base_quality", s.base_quality),
        ] {
            if !(1..=100).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "strategy.{name} must be 1-100, got {value}"
                )));
            }
        }
        if self.processing.workers == Some(0) {
            return Err(ConfigError::Validation(
                "processing.workers must be at least 1".into(),
            ));
        }
        self.to_strategy()
            .validate()
            .map_err(|e| ConfigError::Validation(format!("strategy: {e}")))
    }

    /// The strategy this config selects.
    pub fn to_strategy(&self) -> Strategy {
        let s = &self.strategy;
        match s.mode {
            Mode::TargetSize => Strategy::TargetSize {
                target_kb: s.target_size_kb,
                min_quality: Quality::new(s.min_quality),
                max_quality: Quality::new(s.max_quality),
                save_best_effort: s.save_best_effort,
            },
            Mode::RelativeQuality => Strategy::RelativeQuality {
                base_quality: Quality::new(s.base_quality),
                min_quality: Quality::new(s.min_quality),
                max_quality: Quality::new(s.max_quality),
            },
        }
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            extensions: self.input.extensions.clone(),
            recursive: self.input.recursive,
            case_sensitive: self.input.case_sensitive,
        }
    }
}

/// Input file selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    /// Extensions to compress, without the leading dot.
    pub extensions: Vec<String>,
    pub recursive: bool,
    pub case_sensitive: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            recursive: false,
            case_sensitive: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    TargetSize,
    RelativeQuality,
}

/// Quality strategy settings. Only the keys relevant to `mode` are used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StrategyConfig {
    pub mode: Mode,
    /// Size budget per image in kilobytes (target-size).
    pub target_size_kb: u64,
    pub min_quality: u32,
    pub max_quality: u32,
    /// Quality for an image of exactly average size (relative-quality).
    pub base_quality: u32,
    /// Save the smallest encode when the target cannot be met (target-size).
    pub save_best_effort: bool,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            mode: Mode::TargetSize,
            target_size_kb: 250,
            min_quality: 70,
            max_quality: 98,
            base_quality: 92,
            save_best_effort: true,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Number of parallel workers.
    /// When absent, defaults to the number of CPU cores.
    pub workers: Option<usize>,
}

/// Resolve the effective worker count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `n` as given, even above the core count
pub fn effective_workers(config: &ProcessingConfig) -> usize {
    config
        .workers
        .unwrap_or_else(crate::batch::default_workers)
}

// ============================================================================
// Loading and merging
// ============================================================================

/// Stock defaults as a TOML value, the base every user file is merged onto.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(CompressConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto a base value, then deserialize.
///
/// Values are not validated here; see [`CompressConfig::validate`].
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<CompressConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    Ok(merged.try_into()?)
}

/// Load configuration: stock defaults, with `path` merged on top when given.
///
/// A path that is given but missing is an error.
pub fn load_config(path: Option<&Path>) -> Result<CompressConfig, ConfigError> {
    let overlay = match path {
        Some(p) => {
            let content = fs::read_to_string(p)?;
            Some(toml::from_str::<toml::Value>(&content)?)
        }
        None => None,
    };
    resolve_config(stock_defaults_value(), overlay)
}

/// Returns a fully-commented stock config with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# holy-compress Configuration
# ===========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# Pass the file with `holy-compress --config <FILE> compress ...`.
# Command-line flags override values from this file.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Input selection
# ---------------------------------------------------------------------------
[input]
# File extensions to compress. JPEG is left out: it is already compressed.
extensions = ["png", "webp", "bmp", "tiff", "gif"]
# Descend into subdirectories of the input folder.
recursive = false
# Match extensions case-sensitively ("PNG" would then not match "png").
case_sensitive = false

# ---------------------------------------------------------------------------
# Quality strategy
# ---------------------------------------------------------------------------
[strategy]
# "target-size": highest quality whose JPEG fits target_size_kb.
# "relative-quality": one quality per image, scaled by its size relative to
#                     the batch average (larger images get lower quality).
mode = "target-size"
# Size budget per image in kilobytes (target-size only).
target_size_kb = 250
# Quality bounds (1-100) for both modes.
min_quality = 70
max_quality = 98
# Quality for an image of exactly average size (relative-quality only).
base_quality = 92
# When the target cannot be met even at min_quality, save the smallest
# attempt anyway (target-size only).
save_best_effort = true

# ---------------------------------------------------------------------------
# Parallel processing
# ---------------------------------------------------------------------------
[processing]
# Number of parallel workers. Omit to use all CPU cores.
# workers = 4
"##
}

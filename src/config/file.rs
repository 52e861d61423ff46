//! TOML configuration file loading
//!
//! Supports `~/.config/aisle-guide/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AisleConfigFile {
    #[serde(default)]
    pub camera: CameraFileConfig,

    /// Object detection and per-frame reduction
    #[serde(default)]
    pub perception: PerceptionFileConfig,

    #[serde(default)]
    pub banknote: BanknoteFileConfig,

    #[serde(default)]
    pub ocr: OcrFileConfig,

    /// Voting windows and stability thresholds
    #[serde(default)]
    pub stabilizer: StabilizerFileConfig,

    /// Cooldowns and announcement policy
    #[serde(default)]
    pub commands: CommandsFileConfig,

    #[serde(default)]
    pub speech: SpeechFileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CameraFileConfig {
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PerceptionFileConfig {
    /// Detector weights path
    pub weights: Option<String>,
    /// Force dummy mode on or off; unset means "dummy when weights are missing"
    pub dummy_mode: Option<bool>,
    pub confidence_threshold: Option<f32>,
    pub obstacle_area_threshold: Option<f32>,
    /// Only these labels are kept (empty = all)
    pub allowed_labels: Option<Vec<String>>,
    /// Run banknote/price OCR every N frames
    pub value_sample_stride: Option<u64>,
    pub debug_overlay: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BanknoteFileConfig {
    pub model: Option<String>,
    pub labels: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub margin: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcrFileConfig {
    pub enabled: Option<bool>,
    /// Path to the tesseract binary (default: looked up on `PATH`)
    pub binary: Option<String>,
}

/// Window bound; at most one of the two may be set
#[derive(Debug, Default, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowFileConfig {
    pub window_size: Option<usize>,
    pub window_age_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StabilizerFileConfig {
    pub majority_threshold: Option<f64>,
    pub min_samples_for_stable: Option<usize>,
    /// Bound for every query without its own entry
    pub window_size: Option<usize>,
    pub window_age_ms: Option<u64>,
    /// Per-query bounds, keyed by query name
    #[serde(default)]
    pub windows: BTreeMap<String, WindowFileConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsFileConfig {
    pub default_cooldown_ms: Option<u64>,
    /// Per-command cooldowns, keyed by command name
    #[serde(default)]
    pub cooldown_ms: BTreeMap<String, u64>,
    pub announce_uncertain: Option<bool>,
    pub announce_unavailable: Option<bool>,
    /// `finish` or `interrupt`
    pub shutdown_policy: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeechFileConfig {
    /// `espeak` or `log`
    pub backend: Option<String>,
    pub binary: Option<String>,
    pub voice: Option<String>,
    /// Words per minute
    pub rate: Option<u32>,
}

/// Parse a config file body
///
/// # Errors
///
/// Returns error if the TOML is malformed or has unknown keys
pub fn parse_config_file(content: &str) -> Result<AisleConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file
///
/// An explicit path must exist and parse. The standard path is optional: when it is
/// missing, unreadable or malformed, defaults are used with a warning.
///
/// # Errors
///
/// Returns error if an explicitly given file cannot be read or parsed
pub fn load_config_file(explicit: Option<&Path>) -> Result<AisleConfigFile> {
    if let Some(path) = explicit {
        let content = std::fs::read_to_string(path)?;
        let config = parse_config_file(&content)?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(AisleConfigFile::default());
    };

    if !path.exists() {
        return Ok(AisleConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(AisleConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(AisleConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/aisle-guide/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("aisle-guide").join("config.toml"))
}

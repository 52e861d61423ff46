//! Configuration management for the aisle guide
//!
//! Every setting resolves as env > toml > default. The environment is passed in as a
//! lookup function so resolution stays a pure function of its inputs.

pub mod file;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::dispatch::{CommandId, DispatchConfig, ShutdownPolicy};
use crate::perception::{QueryType, ReducerConfig};
use crate::speech::SpeechBackend;
use crate::stabilizer::{StabilizerConfig, WindowBound};
use crate::{Error, Result};

use file::{AisleConfigFile, WindowFileConfig};

/// Aisle guide configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub camera: CameraConfig,

    pub perception: PerceptionConfig,

    pub banknote: BanknoteConfig,

    pub ocr: OcrConfig,

    /// Voting windows and stability thresholds
    pub stabilizer: StabilizerConfig,

    /// Cooldowns and announcement policy
    pub dispatch: DispatchConfig,

    pub speech: SpeechConfig,

    /// What happens to an in-flight announcement on quit
    pub shutdown_policy: ShutdownPolicy,
}

/// Frame source settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConfig {
    /// Frames per second driven through the loop
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fps: 15,
            width: 640,
            height: 480,
        }
    }
}

impl CameraConfig {
    /// Time between two frame ticks
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Object detection settings
#[derive(Debug, Clone, PartialEq)]
pub struct PerceptionConfig {
    /// Detector weights; missing weights mean dummy mode
    pub weights: PathBuf,

    /// Force dummy mode on or off (`None` = derive from weights)
    pub dummy_mode: Option<bool>,

    pub confidence_threshold: f32,

    /// Minimum box area (fraction of frame) for an obstacle
    pub obstacle_area_threshold: f32,

    /// Labels kept from the detector (empty = all)
    pub allowed_labels: Vec<String>,

    /// Banknote and price run every N frames
    pub value_sample_stride: u64,

    /// Log per-frame detections at debug level
    pub debug_overlay: bool,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            weights: default_assets_dir().join("yolo_weights.pt"),
            dummy_mode: None,
            confidence_threshold: 0.4,
            obstacle_area_threshold: 0.18,
            allowed_labels: Vec::new(),
            value_sample_stride: 3,
            debug_overlay: false,
        }
    }
}

impl PerceptionConfig {
    #[must_use]
    pub const fn reducer_config(&self) -> ReducerConfig {
        ReducerConfig {
            confidence_threshold: self.confidence_threshold,
            obstacle_area_threshold: self.obstacle_area_threshold,
        }
    }
}

/// Banknote classifier settings
#[derive(Debug, Clone, PartialEq)]
pub struct BanknoteConfig {
    pub model: PathBuf,
    /// Ordered label vocabulary, one label per line
    pub labels: PathBuf,
    pub confidence_threshold: f32,
    /// Minimum gap between the top two scores
    pub margin: f32,
}

impl Default for BanknoteConfig {
    fn default() -> Self {
        let assets = default_assets_dir();
        Self {
            model: assets.join("banknote.tflite"),
            labels: assets.join("banknote_labels.txt"),
            confidence_threshold: 0.6,
            margin: 0.2,
        }
    }
}

/// OCR settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Tesseract binary (`None` = look up on `PATH`)
    pub binary: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
        }
    }
}

/// Speech output settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechConfig {
    pub backend: SpeechBackend,
    /// `espeak-ng` binary (`None` = look up on `PATH`)
    pub binary: Option<PathBuf>,
    pub voice: String,
    /// Words per minute
    pub rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            backend: SpeechBackend::Espeak,
            binary: None,
            voice: "en".to_string(),
            rate: 170,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraConfig::default(),
            perception: PerceptionConfig::default(),
            banknote: BanknoteConfig::default(),
            ocr: OcrConfig::default(),
            stabilizer: StabilizerConfig {
                windows: QueryType::ALL
                    .iter()
                    .map(|&q| (q, WindowBound::default()))
                    .collect(),
                ..StabilizerConfig::default()
            },
            dispatch: DispatchConfig::default(),
            speech: SpeechConfig::default(),
            shutdown_policy: ShutdownPolicy::default(),
        }
    }
}

/// Where bundled models and label files live by default
#[must_use]
pub fn default_assets_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("assets"),
        |d| d.data_dir().join("aisle-guide").join("assets"),
    )
}

impl Config {
    /// Load from the config file (explicit or standard path) and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit config file is unreadable, or any value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let fc = file::load_config_file(path)?;
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve settings from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of range or unrecognized
    #[allow(clippy::too_many_lines)]
    pub fn resolve(fc: AisleConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let camera = CameraConfig {
            fps: parsed(&env, "AISLE_FPS")
                .or(fc.camera.fps)
                .unwrap_or(defaults.camera.fps),
            width: fc.camera.width.unwrap_or(defaults.camera.width),
            height: fc.camera.height.unwrap_or(defaults.camera.height),
        };

        // Perception (env > toml > default)
        let perception = PerceptionConfig {
            weights: env("AISLE_WEIGHTS")
                .or(fc.perception.weights)
                .map_or(defaults.perception.weights, PathBuf::from),
            dummy_mode: env("AISLE_DUMMY_MODE")
                .map(|v| flag(&v))
                .or(fc.perception.dummy_mode),
            confidence_threshold: parsed(&env, "AISLE_CONFIDENCE_THRESHOLD")
                .or(fc.perception.confidence_threshold)
                .unwrap_or(defaults.perception.confidence_threshold),
            obstacle_area_threshold: parsed(&env, "AISLE_OBSTACLE_AREA_THRESHOLD")
                .or(fc.perception.obstacle_area_threshold)
                .unwrap_or(defaults.perception.obstacle_area_threshold),
            allowed_labels: env("AISLE_ALLOWED_LABELS")
                .map(|s| {
                    s.split(',')
                        .map(|l| l.trim().to_string())
                        .filter(|l| !l.is_empty())
                        .collect()
                })
                .or(fc.perception.allowed_labels)
                .unwrap_or_default(),
            value_sample_stride: parsed(&env, "AISLE_VALUE_STRIDE")
                .or(fc.perception.value_sample_stride)
                .unwrap_or(defaults.perception.value_sample_stride),
            debug_overlay: env("AISLE_DEBUG_OVERLAY")
                .map(|v| flag(&v))
                .or(fc.perception.debug_overlay)
                .unwrap_or(defaults.perception.debug_overlay),
        };

        let banknote = BanknoteConfig {
            model: env("AISLE_BANKNOTE_MODEL")
                .or(fc.banknote.model)
                .map_or(defaults.banknote.model, PathBuf::from),
            labels: env("AISLE_BANKNOTE_LABELS")
                .or(fc.banknote.labels)
                .map_or(defaults.banknote.labels, PathBuf::from),
            confidence_threshold: fc
                .banknote
                .confidence_threshold
                .unwrap_or(defaults.banknote.confidence_threshold),
            margin: fc.banknote.margin.unwrap_or(defaults.banknote.margin),
        };

        let ocr = OcrConfig {
            enabled: env("AISLE_OCR_ENABLED")
                .map(|v| flag(&v))
                .or(fc.ocr.enabled)
                .unwrap_or(defaults.ocr.enabled),
            binary: env("AISLE_TESSERACT").or(fc.ocr.binary).map(PathBuf::from),
        };

        // Stabilizer: env global bound replaces the file's global bound
        let env_window = WindowFileConfig {
            window_size: parsed(&env, "AISLE_WINDOW_SIZE"),
            window_age_ms: parsed(&env, "AISLE_WINDOW_AGE_MS"),
        };
        let file_window = WindowFileConfig {
            window_size: fc.stabilizer.window_size,
            window_age_ms: fc.stabilizer.window_age_ms,
        };
        let global = match window_bound(env_window, "AISLE_WINDOW_*")? {
            Some(bound) => Some(bound),
            None => window_bound(file_window, "stabilizer")?,
        };

        let mut per_query = BTreeMap::new();
        for (name, window) in &fc.stabilizer.windows {
            let query = parse_query(name)?;
            if let Some(bound) = window_bound(*window, &format!("stabilizer.windows.{name}"))? {
                per_query.insert(query, bound);
            }
        }
        let windows = QueryType::ALL
            .iter()
            .map(|&q| {
                let bound = per_query.get(&q).copied().or(global).unwrap_or_default();
                (q, bound)
            })
            .collect();

        let stabilizer = StabilizerConfig {
            majority_threshold: parsed(&env, "AISLE_MAJORITY_THRESHOLD")
                .or(fc.stabilizer.majority_threshold)
                .unwrap_or(defaults.stabilizer.majority_threshold),
            min_samples_for_stable: parsed(&env, "AISLE_MIN_SAMPLES")
                .or(fc.stabilizer.min_samples_for_stable)
                .unwrap_or(defaults.stabilizer.min_samples_for_stable),
            windows,
        };

        // Commands
        let mut cooldowns = defaults.dispatch.cooldowns.clone();
        for (name, ms) in &fc.commands.cooldown_ms {
            let command = CommandId::from_str(name)
                .map_err(|_| Error::Config(format!("commands.cooldown_ms: unknown command '{name}'")))?;
            cooldowns.insert(command, Duration::from_millis(*ms));
        }
        for command in CommandId::ALL {
            let key = format!("AISLE_{}_COOLDOWN_MS", command.as_str().to_uppercase());
            if let Some(ms) = parsed::<u64>(&env, &key) {
                cooldowns.insert(command, Duration::from_millis(ms));
            }
        }

        let dispatch = DispatchConfig {
            announce_uncertain: env("AISLE_ANNOUNCE_UNCERTAIN")
                .map(|v| flag(&v))
                .or(fc.commands.announce_uncertain)
                .unwrap_or(defaults.dispatch.announce_uncertain),
            announce_unavailable: env("AISLE_ANNOUNCE_UNAVAILABLE")
                .map(|v| flag(&v))
                .or(fc.commands.announce_unavailable)
                .unwrap_or(defaults.dispatch.announce_unavailable),
            default_cooldown: parsed(&env, "AISLE_COOLDOWN_MS")
                .or(fc.commands.default_cooldown_ms)
                .map_or(defaults.dispatch.default_cooldown, Duration::from_millis),
            cooldowns,
        };

        let shutdown_policy = env("AISLE_SHUTDOWN_POLICY")
            .or(fc.commands.shutdown_policy)
            .map(|s| parse_shutdown_policy(&s))
            .transpose()?
            .unwrap_or(defaults.shutdown_policy);

        let speech = SpeechConfig {
            backend: env("AISLE_SPEECH_BACKEND")
                .or(fc.speech.backend)
                .map(|s| parse_speech_backend(&s))
                .transpose()?
                .unwrap_or(defaults.speech.backend),
            binary: env("AISLE_ESPEAK").or(fc.speech.binary).map(PathBuf::from),
            voice: env("AISLE_VOICE")
                .or(fc.speech.voice)
                .unwrap_or(defaults.speech.voice),
            rate: parsed(&env, "AISLE_SPEECH_RATE")
                .or(fc.speech.rate)
                .unwrap_or(defaults.speech.rate),
        };

        let config = Self {
            camera,
            perception,
            banknote,
            ocr,
            stabilizer,
            dispatch,
            speech,
            shutdown_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        let threshold = self.stabilizer.majority_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "majority_threshold must be in (0, 1], got {threshold}"
            )));
        }
        if self.stabilizer.min_samples_for_stable == 0 {
            return Err(Error::Config("min_samples_for_stable must be at least 1".to_string()));
        }
        for (name, value) in [
            ("confidence_threshold", self.perception.confidence_threshold),
            ("obstacle_area_threshold", self.perception.obstacle_area_threshold),
            ("banknote.confidence_threshold", self.banknote.confidence_threshold),
            ("banknote.margin", self.banknote.margin),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::Config(format!("{name} must be in [0, 1], got {value}")));
            }
        }
        if self.camera.fps == 0 {
            return Err(Error::Config("fps must be at least 1".to_string()));
        }
        if self.perception.value_sample_stride == 0 {
            return Err(Error::Config("value_sample_stride must be at least 1".to_string()));
        }
        if self.speech.rate == 0 {
            return Err(Error::Config("speech rate must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Cooldown that applies to a command
    #[must_use]
    pub fn cooldown_for(&self, command: CommandId) -> Duration {
        self.dispatch
            .cooldowns
            .get(&command)
            .copied()
            .unwrap_or(self.dispatch.default_cooldown)
    }
}

fn flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment value");
            None
        }
    }
}

fn window_bound(window: WindowFileConfig, scope: &str) -> Result<Option<WindowBound>> {
    match (window.window_size, window.window_age_ms) {
        (Some(_), Some(_)) => Err(Error::Config(format!(
            "{scope}: window_size and window_age_ms are mutually exclusive"
        ))),
        (Some(0), None) => Err(Error::Config(format!("{scope}: window_size must be at least 1"))),
        (None, Some(0)) => Err(Error::Config(format!("{scope}: window_age_ms must be positive"))),
        (Some(n), None) => Ok(Some(WindowBound::Samples(n))),
        (None, Some(ms)) => Ok(Some(WindowBound::Age(Duration::from_millis(ms)))),
        (None, None) => Ok(None),
    }
}

fn parse_query(name: &str) -> Result<QueryType> {
    QueryType::ALL
        .into_iter()
        .find(|q| q.as_str().eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| Error::Config(format!("stabilizer.windows: unknown query '{name}'")))
}

fn parse_shutdown_policy(value: &str) -> Result<ShutdownPolicy> {
    match value.trim().to_lowercase().as_str() {
        "finish" => Ok(ShutdownPolicy::Finish),
        "interrupt" => Ok(ShutdownPolicy::Interrupt),
        other => Err(Error::Config(format!(
            "shutdown_policy must be 'finish' or 'interrupt', got '{other}'"
        ))),
    }
}

fn parse_speech_backend(value: &str) -> Result<SpeechBackend> {
    match value.trim().to_lowercase().as_str() {
        "espeak" | "espeak-ng" => Ok(SpeechBackend::Espeak),
        "log" => Ok(SpeechBackend::Log),
        other => Err(Error::Config(format!(
            "speech backend must be 'espeak' or 'log', got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::file::parse_config_file;
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(AisleConfigFile::default(), env_from(&[])).unwrap();
        assert!((config.stabilizer.majority_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.stabilizer.windows[&QueryType::Identify], WindowBound::Samples(10));
        assert_eq!(config.cooldown_for(CommandId::Identify), Duration::from_secs(2));
        assert_eq!(config.cooldown_for(CommandId::Obstacle), Duration::from_millis(1500));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Finish);
        assert!(config.perception.dummy_mode.is_none());
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = parse_config_file(
            r"
            [stabilizer]
            majority_threshold = 0.6
            min_samples_for_stable = 3

            [commands.cooldown_ms]
            identify = 5000
            ",
        )
        .unwrap();
        let env = env_from(&[
            ("AISLE_MAJORITY_THRESHOLD", "0.7"),
            ("AISLE_DUMMY_MODE", "true"),
            ("AISLE_SHUTDOWN_POLICY", "interrupt"),
        ]);
        let config = Config::resolve(fc, env).unwrap();

        assert!((config.stabilizer.majority_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.stabilizer.min_samples_for_stable, 3);
        assert_eq!(config.cooldown_for(CommandId::Identify), Duration::from_secs(5));
        assert_eq!(config.perception.dummy_mode, Some(true));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Interrupt);
    }

    #[test]
    fn test_per_query_window_bounds() {
        let fc = parse_config_file(
            r"
            [stabilizer]
            window_size = 6

            [stabilizer.windows.obstacle]
            window_age_ms = 800
            ",
        )
        .unwrap();
        let config = Config::resolve(fc, env_from(&[])).unwrap();
        assert_eq!(config.stabilizer.windows[&QueryType::Count], WindowBound::Samples(6));
        assert_eq!(
            config.stabilizer.windows[&QueryType::Obstacle],
            WindowBound::Age(Duration::from_millis(800))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        let both = parse_config_file("[stabilizer]\nwindow_size = 5\nwindow_age_ms = 100\n").unwrap();
        assert!(Config::resolve(both, env_from(&[])).is_err());

        let threshold = env_from(&[("AISLE_MAJORITY_THRESHOLD", "1.5")]);
        assert!(Config::resolve(AisleConfigFile::default(), threshold).is_err());

        let unknown = parse_config_file("[commands.cooldown_ms]\ndance = 10\n").unwrap();
        assert!(Config::resolve(unknown, env_from(&[])).is_err());

        let policy = env_from(&[("AISLE_SHUTDOWN_POLICY", "later")]);
        assert!(Config::resolve(AisleConfigFile::default(), policy).is_err());
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let env = env_from(&[("AISLE_FPS", "fast")]);
        let config = Config::resolve(AisleConfigFile::default(), env).unwrap();
        assert_eq!(config.camera.fps, 15);
    }
}

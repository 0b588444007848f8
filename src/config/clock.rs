//! Clock configuration structures.

use serde::{Deserialize, Serialize};

/// Env var holding a JSON [`ClockConfig`] for [`ClockConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "SYNTH_CLOCK_CONFIG";

/// How an app clock treats entries that become due during an advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveMode {
    /// Keep running until nothing is due, including entries scheduled
    /// during the advance.
    #[default]
    Recursive,
    /// Run only what was due when the advance started.
    NonRecursive,
}

/// System clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemClockConfig {
    /// Name used in logs and thread names.
    pub name: String,
    /// Maximum queued entries before scheduling is refused.
    pub max_queue_depth: usize,
    /// Seconds between wire-offset resyncs.
    pub resync_interval_secs: f64,
    /// Readings taken per resync.
    pub resync_samples: usize,
}

impl Default for SystemClockConfig {
    fn default() -> Self {
        Self {
            name: "system".into(),
            max_queue_depth: 4096,
            resync_interval_secs: 20.0,
            resync_samples: 8,
        }
    }
}

impl SystemClockConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if !(self.resync_interval_secs.is_finite() && self.resync_interval_secs > 0.0) {
            return Err("resync_interval_secs must be greater than 0".into());
        }
        if self.resync_samples == 0 {
            return Err("resync_samples must be greater than 0".into());
        }
        Ok(())
    }
}

/// Tempo clock configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoClockConfig {
    /// Name used in logs and thread names.
    pub name: String,
    /// Beats per second.
    pub tempo: f64,
    /// Beat reading at construction.
    pub beats: f64,
    /// Beats per bar.
    pub beats_per_bar: f64,
    /// Maximum queued entries before scheduling is refused.
    pub max_queue_depth: usize,
    /// Survive `TempoClock::reset_all`.
    pub permanent: bool,
}

impl Default for TempoClockConfig {
    fn default() -> Self {
        Self {
            name: "tempo".into(),
            tempo: 1.0,
            beats: 0.0,
            beats_per_bar: 4.0,
            max_queue_depth: 4096,
            permanent: false,
        }
    }
}

impl TempoClockConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.tempo.is_finite() && self.tempo > 0.0) {
            return Err("tempo must be greater than 0".into());
        }
        if !self.beats.is_finite() {
            return Err("beats must be finite".into());
        }
        if !(self.beats_per_bar.is_finite() && self.beats_per_bar > 0.0) {
            return Err("beats_per_bar must be greater than 0".into());
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        Ok(())
    }
}

/// App clock configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppClockConfig {
    /// Name used in logs.
    pub name: String,
    /// Advance semantics.
    pub mode: DriveMode,
    /// Maximum queued entries before scheduling is refused.
    pub max_queue_depth: usize,
}

impl Default for AppClockConfig {
    fn default() -> Self {
        Self {
            name: "app".into(),
            mode: DriveMode::default(),
            max_queue_depth: 4096,
        }
    }
}

impl AppClockConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration: one section per clock kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// System clock section.
    pub system: SystemClockConfig,
    /// Tempo clock section.
    pub tempo: TempoClockConfig,
    /// App clock section.
    pub app: AppClockConfig,
}

impl ClockConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.system.validate().map_err(|e| format!("system clock invalid: {e}"))?;
        self.tempo.validate().map_err(|e| format!("tempo clock invalid: {e}"))?;
        self.app.validate().map_err(|e| format!("app clock invalid: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from the JSON in [`CONFIG_ENV_VAR`] (after reading a `.env` file
    /// if present), or defaults when the variable is unset.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => Self::from_json_str(&json),
            Err(std::env::VarError::NotPresent) => Ok(Self::default()),
            Err(err) => Err(format!("{CONFIG_ENV_VAR}: {err}")),
        }
    }
}

//! Build a set of clocks from configuration.

use tracing::warn;

use crate::config::ClockConfig;
use crate::core::{AppClock, ClockError, LogicalClock, SystemClock, TempoClock};

/// One clock of each kind, built from a single [`ClockConfig`].
#[derive(Clone)]
pub struct ClockSet {
    /// Physical-time clock.
    pub system: SystemClock,
    /// Beat-time clock.
    pub tempo: TempoClock,
    /// Host-driven clock.
    pub app: AppClock,
}

impl ClockSet {
    /// Stop all three clocks. Failures are logged and the rest still stop.
    pub fn stop_all(&self) {
        if let Err(err) = self.tempo.stop() {
            warn!(clock = %self.tempo.name(), error = %err, "failed to stop clock");
        }
        if let Err(err) = self.app.stop() {
            warn!(clock = %self.app.name(), error = %err, "failed to stop clock");
        }
        if let Err(err) = self.system.stop() {
            warn!(clock = %self.system.name(), error = %err, "failed to stop clock");
        }
    }
}

/// Validate `cfg` and start one clock per section.
///
/// # Errors
///
/// Fails if the config is invalid or a clock thread cannot be spawned. Clocks
/// already started are stopped again before returning.
pub fn build_clocks(cfg: &ClockConfig) -> Result<ClockSet, ClockError> {
    cfg.validate().map_err(ClockError::InvalidConfig)?;

    let app = AppClock::new(&cfg.app)?;
    let system = SystemClock::new(&cfg.system)?;
    let tempo = match TempoClock::with_config(&cfg.tempo) {
        Ok(tempo) => tempo,
        Err(err) => {
            system.stop()?;
            return Err(err);
        }
    };
    Ok(ClockSet { system, tempo, app })
}

//! The time-conversion contract shared by every clock.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::app_clock::AppClock;
use super::entry::Schedulable;
use super::error::ClockError;
use super::system_clock::SystemClock;
use super::tempo_clock::TempoClock;
use super::thread_state;

/// Process-unique clock identifier.
pub type ClockId = u64;

static NEXT_CLOCK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_clock_id() -> ClockId {
    NEXT_CLOCK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Smallest time `>= now` on the grid `phase + k * quant`.
///
/// A `quant` of zero means "no grid": the result is `now + phase`. A negative
/// `quant` is treated as its magnitude.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn next_time_on_grid(now: f64, quant: f64, phase: f64) -> f64 {
    if quant == 0.0 {
        return now + phase;
    }
    let quant = quant.abs();
    let phase = phase.rem_euclid(quant);
    round_up(now - phase, quant) + phase
}

fn round_up(value: f64, quant: f64) -> f64 {
    (value / quant).ceil() * quant
}

/// Quantization settings: grid period, phase within it, and how far ahead of
/// the grid point the caller wants to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Quant {
    /// Grid period in clock units; zero disables alignment.
    pub quant: f64,
    /// Offset of the grid within each period.
    pub phase: f64,
    /// Lead time subtracted from the grid point.
    pub timing_offset: f64,
}

impl Quant {
    /// Grid of period `quant` with no phase or timing offset.
    #[must_use]
    pub const fn new(quant: f64) -> Self {
        Self {
            quant,
            phase: 0.0,
            timing_offset: 0.0,
        }
    }

    /// Set the phase within each period.
    #[must_use]
    pub const fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase;
        self
    }

    /// Set the lead time subtracted from the grid point.
    #[must_use]
    pub const fn with_timing_offset(mut self, timing_offset: f64) -> Self {
        self.timing_offset = timing_offset;
        self
    }

    /// Next grid point on `clock`, shifted earlier by the timing offset.
    ///
    /// # Errors
    ///
    /// Fails if `clock` is not running.
    pub fn next_time_on_grid<C: LogicalClock + ?Sized>(&self, clock: &C) -> Result<f64, ClockError> {
        clock.next_time_on_grid(self.quant, self.phase - self.timing_offset)
    }
}

/// Operations every clock provides.
///
/// `beats` and `seconds` answer for the *calling context*: inside a task they
/// are the task's logical time, outside they are main's.
pub trait LogicalClock {
    /// Process-unique identifier.
    fn id(&self) -> ClockId;

    /// Human-readable name used in logs.
    fn name(&self) -> &str;

    /// Logical seconds of the calling context.
    fn seconds(&self) -> f64 {
        thread_state::logical_seconds()
    }

    /// Logical time of the calling context in this clock's units.
    ///
    /// # Errors
    ///
    /// Fails with `ClockError::NotRunning` on a stopped clock.
    fn beats(&self) -> Result<f64, ClockError>;

    /// Convert this clock's units to elapsed seconds.
    fn beats2secs(&self, beats: f64) -> f64;

    /// Convert elapsed seconds to this clock's units.
    fn secs2beats(&self, seconds: f64) -> f64;

    /// Smallest time `>= beats()` on the grid `(quant, phase)`.
    ///
    /// # Errors
    ///
    /// Fails with `ClockError::NotRunning` on a stopped clock.
    fn next_time_on_grid(&self, quant: f64, phase: f64) -> Result<f64, ClockError> {
        Ok(next_time_on_grid(self.beats()?, quant, phase))
    }

    /// Schedule `entry` `delta` units after the calling context's logical time.
    ///
    /// # Errors
    ///
    /// Fails if the clock is stopped, the queue is full, or the time is not finite.
    fn schedule(&self, delta: f64, entry: impl Into<Schedulable>) -> Result<(), ClockError>;

    /// Schedule `entry` at the absolute time `time` in this clock's units.
    ///
    /// # Errors
    ///
    /// Fails if the clock is stopped, the queue is full, or the time is not finite.
    fn schedule_absolute(&self, time: f64, entry: impl Into<Schedulable>)
        -> Result<(), ClockError>;

    /// Discard every queued entry.
    fn clear(&self);

    /// Stop the clock. Whether this blocks depends on the clock kind.
    ///
    /// # Errors
    ///
    /// Fails if a helper thread could not be spawned.
    fn stop(&self) -> Result<(), ClockError>;

    /// Whether the clock still accepts work.
    fn is_running(&self) -> bool;

    /// Number of queued entries.
    fn queue_len(&self) -> usize;
}

/// Handle to any clock, as held by tasks and passed to resumed entries.
#[derive(Clone)]
pub enum Clock {
    /// Physical-time clock with its own thread.
    System(SystemClock),
    /// Beat-time clock with its own thread.
    Tempo(TempoClock),
    /// Host-driven clock without a thread.
    App(AppClock),
}

macro_rules! each_clock {
    ($self:ident, $clock:ident => $body:expr) => {
        match $self {
            Clock::System($clock) => $body,
            Clock::Tempo($clock) => $body,
            Clock::App($clock) => $body,
        }
    };
}

impl LogicalClock for Clock {
    fn id(&self) -> ClockId {
        each_clock!(self, c => c.id())
    }

    fn name(&self) -> &str {
        each_clock!(self, c => c.name())
    }

    fn beats(&self) -> Result<f64, ClockError> {
        each_clock!(self, c => c.beats())
    }

    fn beats2secs(&self, beats: f64) -> f64 {
        each_clock!(self, c => c.beats2secs(beats))
    }

    fn secs2beats(&self, seconds: f64) -> f64 {
        each_clock!(self, c => c.secs2beats(seconds))
    }

    fn next_time_on_grid(&self, quant: f64, phase: f64) -> Result<f64, ClockError> {
        each_clock!(self, c => c.next_time_on_grid(quant, phase))
    }

    fn schedule(&self, delta: f64, entry: impl Into<Schedulable>) -> Result<(), ClockError> {
        each_clock!(self, c => c.schedule(delta, entry))
    }

    fn schedule_absolute(
        &self,
        time: f64,
        entry: impl Into<Schedulable>,
    ) -> Result<(), ClockError> {
        each_clock!(self, c => c.schedule_absolute(time, entry))
    }

    fn clear(&self) {
        each_clock!(self, c => c.clear());
    }

    fn stop(&self) -> Result<(), ClockError> {
        each_clock!(self, c => c.stop())
    }

    fn is_running(&self) -> bool {
        each_clock!(self, c => c.is_running())
    }

    fn queue_len(&self) -> usize {
        each_clock!(self, c => c.queue_len())
    }
}

impl From<SystemClock> for Clock {
    fn from(clock: SystemClock) -> Self {
        Self::System(clock)
    }
}

impl From<TempoClock> for Clock {
    fn from(clock: TempoClock) -> Self {
        Self::Tempo(clock)
    }
}

impl From<AppClock> for Clock {
    fn from(clock: AppClock) -> Self {
        Self::App(clock)
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::System(_) => "System",
            Self::Tempo(_) => "Tempo",
            Self::App(_) => "App",
        };
        f.debug_struct("Clock")
            .field("kind", &kind)
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

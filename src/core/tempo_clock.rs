//! Beat-time clock with a live, changeable tempo.
//!
//! Beats map onto elapsed seconds through an affine grid anchored at
//! `(base_beats, base_seconds)`. Changing tempo re-anchors the grid at the
//! current beat first, so the timeline stays continuous.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::clock::{next_clock_id, next_time_on_grid, Clock, ClockId, LogicalClock};
use super::clock_thread::{spawn_clock_thread, ClockCore, TimeBasis};
use super::entry::Schedulable;
use super::error::ClockError;
use super::thread_state;
use crate::config::TempoClockConfig;
use crate::util::clock::elapsed;

#[derive(Debug, Clone, Copy)]
struct TempoGrid {
    tempo: f64,
    beat_duration: f64,
    base_beats: f64,
    base_seconds: f64,
    beats_per_bar: f64,
    base_bar_beat: f64,
    base_bar: f64,
}

impl TempoGrid {
    fn beats2secs(&self, beats: f64) -> f64 {
        (beats - self.base_beats) * self.beat_duration + self.base_seconds
    }

    fn secs2beats(&self, seconds: f64) -> f64 {
        (seconds - self.base_seconds) * self.tempo + self.base_beats
    }

    fn beats2bars(&self, beats: f64) -> f64 {
        (beats - self.base_bar_beat) / self.beats_per_bar + self.base_bar
    }

    fn bars2beats(&self, bars: f64) -> f64 {
        (bars - self.base_bar) * self.beats_per_bar + self.base_bar_beat
    }
}

pub(crate) struct TempoBasis {
    grid: RwLock<TempoGrid>,
}

impl TimeBasis for TempoBasis {
    fn seconds_until(&self, time: f64) -> f64 {
        self.grid.read().beats2secs(time) - elapsed()
    }

    fn awake_times(&self, time: f64) -> (f64, f64) {
        (time, self.grid.read().beats2secs(time))
    }
}

struct TempoInner {
    core: ClockCore<TempoBasis>,
    permanent: AtomicBool,
}

/// Schedules entries by beats on its own thread.
///
/// Every running instance is listed in a process-wide registry so
/// [`TempoClock::reset_all`] can reach it. Stopping is asynchronous: the
/// clock retires on a helper thread and [`TempoClock::stop`] returns at once.
#[derive(Clone)]
pub struct TempoClock {
    inner: Arc<TempoInner>,
}

static LIVE: LazyLock<Mutex<Vec<TempoClock>>> = LazyLock::new(|| Mutex::new(Vec::new()));
static DEFAULT: Mutex<Option<TempoClock>> = Mutex::new(None);

fn validate_tempo(tempo: f64) -> Result<(), ClockError> {
    if tempo.is_finite() && tempo > 0.0 {
        Ok(())
    } else {
        Err(ClockError::InvalidTempo(tempo))
    }
}

impl TempoClock {
    /// Start a clock at `tempo` beats per second, reading beat 0 now.
    ///
    /// # Errors
    ///
    /// Fails on an invalid tempo or if the thread cannot be spawned.
    pub fn new(tempo: f64) -> Result<Self, ClockError> {
        Self::with_config(&TempoClockConfig {
            tempo,
            ..TempoClockConfig::default()
        })
    }

    /// Start a clock from `config`. Its beat `config.beats` is anchored at
    /// the calling context's logical seconds.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or the thread cannot be spawned.
    pub fn with_config(config: &TempoClockConfig) -> Result<Self, ClockError> {
        validate_tempo(config.tempo)?;
        config.validate().map_err(ClockError::InvalidConfig)?;
        let id = next_clock_id();
        let grid = TempoGrid {
            tempo: config.tempo,
            beat_duration: config.tempo.recip(),
            base_beats: config.beats,
            base_seconds: thread_state::logical_seconds(),
            beats_per_bar: config.beats_per_bar,
            base_bar_beat: 0.0,
            base_bar: 0.0,
        };
        let clock = Self {
            inner: Arc::new(TempoInner {
                core: ClockCore::new(
                    id,
                    config.name.clone(),
                    config.max_queue_depth,
                    TempoBasis {
                        grid: RwLock::new(grid),
                    },
                ),
                permanent: AtomicBool::new(config.permanent),
            }),
        };

        let runner = clock.clone();
        spawn_clock_thread(&config.name, id, move || {
            let as_clock = Clock::Tempo(runner.clone());
            runner.inner.core.run(&as_clock);
        })?;
        LIVE.lock().push(clock.clone());

        info!(clock = %config.name, id, tempo = config.tempo, permanent = config.permanent, "tempo clock started");
        Ok(clock)
    }

    /// The process-wide permanent clock at tempo 1, started on first use.
    ///
    /// # Errors
    ///
    /// Fails if the clock has to be started and cannot be.
    pub fn default_clock() -> Result<Self, ClockError> {
        let mut default = DEFAULT.lock();
        if let Some(clock) = default.as_ref().filter(|c| c.is_running()) {
            return Ok(clock.clone());
        }
        let clock = Self::with_config(&TempoClockConfig {
            name: "default".into(),
            permanent: true,
            ..TempoClockConfig::default()
        })?;
        *default = Some(clock.clone());
        Ok(clock)
    }

    /// Snapshot of every live tempo clock.
    #[must_use]
    pub fn all() -> Vec<Self> {
        LIVE.lock().clone()
    }

    /// Clear every live clock's queue and stop the non-permanent ones.
    pub fn reset_all() {
        let clocks = Self::all();
        info!(count = clocks.len(), "resetting all tempo clocks");
        for clock in clocks {
            clock.clear();
            if !clock.is_permanent() {
                if let Err(err) = clock.stop() {
                    warn!(clock = %clock.name(), error = %err, "could not stop tempo clock during reset");
                }
            }
        }
    }

    /// Whether [`TempoClock::reset_all`] leaves this clock running.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.inner.permanent.load(Ordering::Acquire)
    }

    /// Mark the clock as surviving (or not) a global reset.
    pub fn set_permanent(&self, permanent: bool) {
        self.inner.permanent.store(permanent, Ordering::Release);
    }

    fn grid(&self) -> TempoGrid {
        *self.inner.core.basis.grid.read()
    }

    fn current_beats(&self) -> f64 {
        thread_state::frame_beats_on(self.id())
            .unwrap_or_else(|| self.grid().secs2beats(thread_state::logical_seconds()))
    }

    /// Beats per second.
    ///
    /// # Errors
    ///
    /// Fails on a stopped clock.
    pub fn tempo(&self) -> Result<f64, ClockError> {
        self.inner.core.ensure_running()?;
        Ok(self.grid().tempo)
    }

    /// Seconds per beat.
    ///
    /// # Errors
    ///
    /// Fails on a stopped clock.
    pub fn beat_duration(&self) -> Result<f64, ClockError> {
        self.inner.core.ensure_running()?;
        Ok(self.grid().beat_duration)
    }

    /// Change tempo at the current beat without moving it in time.
    ///
    /// # Errors
    ///
    /// Fails on an invalid tempo or a stopped clock.
    pub fn set_tempo(&self, tempo: f64) -> Result<(), ClockError> {
        validate_tempo(tempo)?;
        let beats = self.beats()?;
        {
            let mut grid = self.inner.core.basis.grid.write();
            grid.base_seconds = grid.beats2secs(beats);
            grid.base_beats = beats;
            grid.tempo = tempo;
            grid.beat_duration = tempo.recip();
        }
        self.inner.core.notify();
        debug!(clock = %self.name(), tempo, beats, "tempo changed");
        Ok(())
    }

    /// Re-anchor so the calling context's logical instant reads `beats`.
    ///
    /// # Errors
    ///
    /// Fails on a non-finite beat or a stopped clock.
    pub fn set_beats(&self, beats: f64) -> Result<(), ClockError> {
        if !beats.is_finite() {
            return Err(ClockError::InvalidTime(beats));
        }
        self.inner.core.ensure_running()?;
        let seconds = thread_state::logical_seconds();
        {
            let mut grid = self.inner.core.basis.grid.write();
            grid.base_seconds = seconds;
            grid.base_beats = beats;
        }
        self.inner.core.notify();
        Ok(())
    }

    /// Physical now, in beats.
    #[must_use]
    pub fn elapsed_beats(&self) -> f64 {
        self.grid().secs2beats(elapsed())
    }

    /// Change the meter, with bar lines counted from `beat` onwards.
    ///
    /// # Errors
    ///
    /// Fails if `beats_per_bar` is not positive and finite.
    pub fn set_meter_at_beat(&self, beats_per_bar: f64, beat: f64) -> Result<(), ClockError> {
        if !(beats_per_bar.is_finite() && beats_per_bar > 0.0) {
            return Err(ClockError::InvalidConfig(format!(
                "beats_per_bar must be positive, got {beats_per_bar}"
            )));
        }
        let mut grid = self.inner.core.basis.grid.write();
        grid.base_bar = grid.beats2bars(beat);
        grid.base_bar_beat = beat;
        grid.beats_per_bar = beats_per_bar;
        Ok(())
    }

    /// Beats per bar.
    #[must_use]
    pub fn beats_per_bar(&self) -> f64 {
        self.grid().beats_per_bar
    }

    /// Bars elapsed at `beats`.
    #[must_use]
    pub fn beats2bars(&self, beats: f64) -> f64 {
        self.grid().beats2bars(beats)
    }

    /// Beat at which `bars` bars have elapsed.
    #[must_use]
    pub fn bars2beats(&self, bars: f64) -> f64 {
        self.grid().bars2beats(bars)
    }

    /// Index of the current bar.
    ///
    /// # Errors
    ///
    /// Fails on a stopped clock.
    pub fn bar(&self) -> Result<f64, ClockError> {
        Ok(self.beats2bars(self.beats()?).floor())
    }

    /// First bar line at or after `beat`, or after now when `None`.
    ///
    /// # Errors
    ///
    /// Fails on a stopped clock.
    pub fn next_bar(&self, beat: Option<f64>) -> Result<f64, ClockError> {
        let beat = match beat {
            Some(beat) => beat,
            None => self.beats()?,
        };
        let grid = self.grid();
        Ok(grid.bars2beats(grid.beats2bars(beat).ceil()))
    }

    /// Beats since the last bar line.
    ///
    /// # Errors
    ///
    /// Fails on a stopped clock.
    pub fn beat_in_bar(&self) -> Result<f64, ClockError> {
        let beats = self.beats()?;
        let grid = self.grid();
        Ok(beats - grid.bars2beats(grid.beats2bars(beats).floor()))
    }
}

impl LogicalClock for TempoClock {
    fn id(&self) -> ClockId {
        self.inner.core.id
    }

    fn name(&self) -> &str {
        &self.inner.core.name
    }

    /// The calling task's own beats if it is bound here, otherwise the
    /// calling context's seconds converted to beats.
    fn beats(&self) -> Result<f64, ClockError> {
        self.inner.core.ensure_running()?;
        Ok(self.current_beats())
    }

    fn beats2secs(&self, beats: f64) -> f64 {
        self.grid().beats2secs(beats)
    }

    fn secs2beats(&self, seconds: f64) -> f64 {
        self.grid().secs2beats(seconds)
    }

    /// Grid alignment relative to the last meter change; a negative `quant`
    /// counts bars.
    fn next_time_on_grid(&self, quant: f64, phase: f64) -> Result<f64, ClockError> {
        let beats = self.beats()?;
        let grid = self.grid();
        let quant = if quant < 0.0 {
            grid.beats_per_bar * -quant
        } else {
            quant
        };
        Ok(next_time_on_grid(beats - grid.base_bar_beat, quant, phase) + grid.base_bar_beat)
    }

    fn schedule(&self, delta: f64, entry: impl Into<Schedulable>) -> Result<(), ClockError> {
        let now = self.beats()?;
        self.schedule_absolute(now + delta, entry)
    }

    fn schedule_absolute(
        &self,
        time: f64,
        entry: impl Into<Schedulable>,
    ) -> Result<(), ClockError> {
        self.inner.core.insert(time, entry.into())
    }

    fn clear(&self) {
        self.inner.core.clear();
    }

    /// Retire the clock on a helper thread; returns without waiting.
    fn stop(&self) -> Result<(), ClockError> {
        let clock = self.clone();
        thread::Builder::new()
            .name(format!("{}-stop", self.name()))
            .spawn(move || {
                LIVE.lock().retain(|live| live.id() != clock.id());
                let was_running = clock.inner.core.request_stop();
                if was_running {
                    info!(clock = %clock.name(), "tempo clock stopped");
                }
            })?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.core.is_running()
    }

    fn queue_len(&self) -> usize {
        self.inner.core.queue_len()
    }
}

//! Physical-time clock with a dedicated scheduler thread and wire-time resync.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::clock::{next_clock_id, Clock, ClockId, LogicalClock};
use super::clock_thread::{spawn_clock_thread, ClockCore, TimeBasis};
use super::entry::Schedulable;
use super::error::ClockError;
use super::thread_state;
use super::wire::{ResyncThread, WireClock};
use crate::config::SystemClockConfig;
use crate::util::clock::elapsed;

/// Elapsed seconds are the clock's own units.
pub(crate) struct PhysicalBasis;

impl TimeBasis for PhysicalBasis {
    fn seconds_until(&self, time: f64) -> f64 {
        time - elapsed()
    }

    fn awake_times(&self, time: f64) -> (f64, f64) {
        (time, time)
    }
}

#[derive(Default)]
struct Workers {
    scheduler: Option<JoinHandle<()>>,
    resync: Option<ResyncThread>,
}

struct SystemInner {
    core: ClockCore<PhysicalBasis>,
    wire: Arc<WireClock>,
    origin: Instant,
    resync_samples: usize,
    workers: Mutex<Workers>,
}

/// Schedules entries by elapsed seconds on its own thread.
///
/// Beats and seconds are the same thing on this clock. Stopping is
/// synchronous: [`SystemClock::stop`] joins both the scheduler thread and the
/// resync thread.
#[derive(Clone)]
pub struct SystemClock {
    inner: Arc<SystemInner>,
}

static GLOBAL: Mutex<Option<SystemClock>> = Mutex::new(None);

impl SystemClock {
    /// Start a clock with `config`.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid or a thread cannot be spawned.
    pub fn new(config: &SystemClockConfig) -> Result<Self, ClockError> {
        config.validate().map_err(ClockError::InvalidConfig)?;
        let id = next_clock_id();
        let wire = Arc::new(WireClock::new());
        wire.resync(config.resync_samples);

        let clock = Self {
            inner: Arc::new(SystemInner {
                core: ClockCore::new(id, config.name.clone(), config.max_queue_depth, PhysicalBasis),
                wire: Arc::clone(&wire),
                origin: Instant::now(),
                resync_samples: config.resync_samples,
                workers: Mutex::new(Workers::default()),
            }),
        };

        let runner = clock.clone();
        let scheduler = spawn_clock_thread(&config.name, id, move || {
            let as_clock = Clock::System(runner.clone());
            runner.inner.core.run(&as_clock);
        })?;
        let resync = match ResyncThread::spawn(
            &config.name,
            wire,
            Duration::try_from_secs_f64(config.resync_interval_secs).unwrap_or(Duration::MAX),
            config.resync_samples,
        ) {
            Ok(resync) => resync,
            Err(err) => {
                clock.inner.core.request_stop();
                return Err(err.into());
            }
        };
        *clock.inner.workers.lock() = Workers {
            scheduler: Some(scheduler),
            resync: Some(resync),
        };

        info!(
            clock = %config.name,
            id,
            resync_interval_secs = config.resync_interval_secs,
            max_queue_depth = config.max_queue_depth,
            "system clock started"
        );
        Ok(clock)
    }

    /// The process-wide system clock, started on first use with defaults.
    ///
    /// # Errors
    ///
    /// Fails if the clock has to be started and cannot be.
    pub fn global() -> Result<Self, ClockError> {
        let mut global = GLOBAL.lock();
        if let Some(clock) = global.as_ref().filter(|c| c.is_running()) {
            return Ok(clock.clone());
        }
        let clock = Self::new(&SystemClockConfig::default())?;
        *global = Some(clock.clone());
        Ok(clock)
    }

    /// Instant the clock was constructed.
    #[must_use]
    pub fn origin(&self) -> Instant {
        self.inner.origin
    }

    /// Elapsed seconds as wire time, using the current offset.
    #[must_use]
    pub fn elapsed_to_wire(&self, seconds: f64) -> u64 {
        self.inner.wire.elapsed_to_wire(seconds)
    }

    /// Wire time as elapsed seconds, using the current offset.
    #[must_use]
    pub fn wire_to_elapsed(&self, wire: u64) -> f64 {
        self.inner.wire.wire_to_elapsed(wire)
    }

    /// Physical now as wire time.
    #[must_use]
    pub fn wire_now(&self) -> u64 {
        self.inner.wire.now_wire()
    }

    /// Current offset between elapsed time and wire time.
    #[must_use]
    pub fn wire_offset(&self) -> u64 {
        self.inner.wire.offset()
    }

    /// Re-measure the wire offset immediately.
    pub fn resync_now(&self) -> u64 {
        self.inner.wire.resync(self.inner.resync_samples)
    }
}

impl LogicalClock for SystemClock {
    fn id(&self) -> ClockId {
        self.inner.core.id
    }

    fn name(&self) -> &str {
        &self.inner.core.name
    }

    fn beats(&self) -> Result<f64, ClockError> {
        self.inner.core.ensure_running()?;
        Ok(thread_state::logical_seconds())
    }

    fn beats2secs(&self, beats: f64) -> f64 {
        beats
    }

    fn secs2beats(&self, seconds: f64) -> f64 {
        seconds
    }

    fn schedule(&self, delta: f64, entry: impl Into<Schedulable>) -> Result<(), ClockError> {
        let now = thread_state::logical_seconds();
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

    /// Stop and join the scheduler and resync threads.
    ///
    /// Called from a thread that is itself dispatching (any clock's entry),
    /// the scheduler thread is detached instead of joined, since it may be
    /// waiting for that dispatch to finish.
    fn stop(&self) -> Result<(), ClockError> {
        let was_running = self.inner.core.request_stop();
        let workers = std::mem::take(&mut *self.inner.workers.lock());
        if let Some(resync) = workers.resync {
            resync.shutdown();
        }
        if let Some(handle) = workers.scheduler {
            if handle.thread().id() == thread::current().id() || thread_state::holds_run_lock() {
                debug!(clock = %self.name(), "stop requested while dispatching; scheduler thread detached");
            } else if handle.join().is_err() {
                warn!(clock = %self.name(), "scheduler thread panicked");
            }
        }
        if was_running {
            info!(clock = %self.name(), "system clock stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.core.is_running()
    }

    fn queue_len(&self) -> usize {
        self.inner.core.queue_len()
    }
}

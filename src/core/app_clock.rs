//! Host-driven clock with no thread of its own.
//!
//! The host calls [`AppClock::advance`] (or [`AppClock::tick`]) from its own
//! event loop; due entries run on the calling thread. A wake hook lets the
//! host learn when a newly scheduled entry moves the next due time earlier.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::clock::{next_clock_id, Clock, ClockId, LogicalClock};
use super::entry::{dispatch, Schedulable};
use super::error::ClockError;
use super::thread_state;
use crate::config::{AppClockConfig, DriveMode};
use crate::infra::queue::memory::InMemoryQueue;
use crate::util::clock::{elapsed, seconds_until};

type WakeHook = Arc<dyn Fn() + Send + Sync>;

/// Queue and run flag behind an [`AppClock`].
pub(crate) struct CooperativeScheduler {
    queue: InMemoryQueue<Schedulable>,
    mode: DriveMode,
    running: bool,
}

struct AppInner {
    id: ClockId,
    name: String,
    scheduler: Mutex<CooperativeScheduler>,
    wake_hook: RwLock<Option<WakeHook>>,
}

/// Clock advanced explicitly by its host. Units are elapsed seconds.
#[derive(Clone)]
pub struct AppClock {
    inner: Arc<AppInner>,
}

impl AppClock {
    /// Build a clock from `config`.
    ///
    /// # Errors
    ///
    /// Fails if the config is invalid.
    pub fn new(config: &AppClockConfig) -> Result<Self, ClockError> {
        config.validate().map_err(ClockError::InvalidConfig)?;
        Ok(Self::build(config))
    }

    /// Clock with the default config (recursive mode).
    #[must_use]
    pub fn new_default() -> Self {
        Self::with_mode(DriveMode::default())
    }

    /// Clock with default settings and the given drive mode.
    #[must_use]
    pub fn with_mode(mode: DriveMode) -> Self {
        Self::build(&AppClockConfig {
            mode,
            ..AppClockConfig::default()
        })
    }

    fn build(config: &AppClockConfig) -> Self {
        let clock = Self {
            inner: Arc::new(AppInner {
                id: next_clock_id(),
                name: config.name.clone(),
                scheduler: Mutex::new(CooperativeScheduler {
                    queue: InMemoryQueue::new(config.max_queue_depth),
                    mode: config.mode,
                    running: true,
                }),
                wake_hook: RwLock::new(None),
            }),
        };
        info!(clock = %config.name, id = clock.inner.id, mode = ?config.mode, "app clock created");
        clock
    }

    /// How [`AppClock::advance`] treats entries that become due while it runs.
    #[must_use]
    pub fn mode(&self) -> DriveMode {
        self.inner.scheduler.lock().mode
    }

    fn as_clock(&self) -> Clock {
        Clock::App(self.clone())
    }

    /// Run every entry due at or before `to_time`, then return the next due
    /// time, if any.
    ///
    /// In recursive mode an entry scheduled during the advance that is itself
    /// due by `to_time` also runs in this call. In non-recursive mode only the
    /// entries due when the call started run; anything they schedule waits.
    pub fn advance(&self, to_time: f64) -> Option<f64> {
        let clock = self.as_clock();
        let mode = self.inner.scheduler.lock().mode;
        match mode {
            DriveMode::Recursive => loop {
                let due = {
                    let mut scheduler = self.inner.scheduler.lock();
                    if !scheduler.running {
                        break;
                    }
                    scheduler.queue.pop_due(to_time)
                };
                let Some((time, entry)) = due else {
                    break;
                };
                self.run_entry(time, entry, &clock);
            },
            DriveMode::NonRecursive => {
                let batch = {
                    let mut scheduler = self.inner.scheduler.lock();
                    if scheduler.running {
                        scheduler.queue.drain_due(to_time)
                    } else {
                        Vec::new()
                    }
                };
                debug!(clock = %self.inner.name, count = batch.len(), to_time, "advancing batch");
                for (time, entry) in batch {
                    if !self.is_running() {
                        break;
                    }
                    self.run_entry(time, entry, &clock);
                }
            }
        }
        self.next_time()
    }

    fn run_entry(&self, time: f64, entry: Schedulable, clock: &Clock) {
        if let Some((next, entry)) = dispatch(entry, time, time, time, clock) {
            self.requeue(next, entry);
        }
    }

    fn requeue(&self, time: f64, entry: Schedulable) {
        let mut scheduler = self.inner.scheduler.lock();
        if !scheduler.running {
            return;
        }
        let entry_id = entry.id();
        if let Err(err) = scheduler.queue.push(time, entry) {
            warn!(clock = %self.inner.name, entry = entry_id, error = %err, "queue full; rescheduled entry dropped");
        }
    }

    /// Advance to physical now.
    pub fn tick(&self) -> Option<f64> {
        self.advance(elapsed())
    }

    /// Earliest queued time.
    #[must_use]
    pub fn next_time(&self) -> Option<f64> {
        self.inner.scheduler.lock().queue.peek_time()
    }

    /// How long until the next entry is due; zero if already due, `None`
    /// if the queue is empty.
    #[must_use]
    pub fn next_wait(&self) -> Option<Duration> {
        let next = self.next_time()?;
        Some(Duration::try_from_secs_f64(seconds_until(next)).unwrap_or(Duration::MAX))
    }

    /// Install a hook called (outside any lock) whenever scheduling moves
    /// the head of the queue.
    pub fn set_wake_hook<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.wake_hook.write() = Some(Arc::new(hook));
    }

    /// Remove the wake hook.
    pub fn clear_wake_hook(&self) {
        *self.inner.wake_hook.write() = None;
    }

    fn wake(&self) {
        let hook = self.inner.wake_hook.read().clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl LogicalClock for AppClock {
    fn id(&self) -> ClockId {
        self.inner.id
    }

    fn name(&self) -> &str {
        &self.inner.name
    }

    fn beats(&self) -> Result<f64, ClockError> {
        if self.is_running() {
            Ok(thread_state::logical_seconds())
        } else {
            Err(ClockError::NotRunning(self.inner.name.clone()))
        }
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
        if !time.is_finite() {
            return Err(ClockError::InvalidTime(time));
        }
        let entry = entry.into();
        let entry_id = entry.id();
        let head_changed = {
            let mut scheduler = self.inner.scheduler.lock();
            if !scheduler.running {
                return Err(ClockError::NotRunning(self.inner.name.clone()));
            }
            let previous_head = scheduler.queue.peek_seq();
            if let Err(err) = scheduler.queue.push(time, entry) {
                warn!(clock = %self.inner.name, entry = entry_id, time, error = %err, "queue full; entry dropped");
                return Err(err);
            }
            scheduler.queue.peek_seq() != previous_head
        };
        debug!(clock = %self.inner.name, entry = entry_id, time, head_changed, "entry scheduled");
        if head_changed {
            self.wake();
        }
        Ok(())
    }

    fn clear(&self) {
        self.inner.scheduler.lock().queue.clear();
    }

    fn stop(&self) -> Result<(), ClockError> {
        let was_running = {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.queue.clear();
            std::mem::replace(&mut scheduler.running, false)
        };
        if was_running {
            info!(clock = %self.inner.name, "app clock stopped");
            self.wake();
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.inner.scheduler.lock().running
    }

    fn queue_len(&self) -> usize {
        self.inner.scheduler.lock().queue.len()
    }
}

impl fmt::Debug for AppClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppClock")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("queued", &self.queue_len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<f64>>>) -> Schedulable {
        let log = log.clone();
        Schedulable::callback(move |_, seconds, _| {
            log.lock().push(seconds);
            Ok(None)
        })
    }

    #[test]
    fn advance_runs_due_entries_in_time_order() {
        let clock = AppClock::new_default();
        let log = Arc::new(Mutex::new(Vec::new()));
        clock.schedule_absolute(3.0, recorder(&log)).unwrap();
        clock.schedule_absolute(1.0, recorder(&log)).unwrap();
        clock.schedule_absolute(2.0, recorder(&log)).unwrap();

        assert_eq!(clock.advance(2.0), Some(3.0));
        assert_eq!(*log.lock(), vec![1.0, 2.0]);
        assert_eq!(clock.advance(10.0), None);
        assert_eq!(*log.lock(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn with_mode_uses_the_default_config() {
        let clock = AppClock::with_mode(DriveMode::NonRecursive);
        let defaults = AppClockConfig::default();
        assert_eq!(clock.mode(), DriveMode::NonRecursive);
        assert_eq!(clock.name(), defaults.name);
        assert_eq!(clock.inner.scheduler.lock().queue.max_depth(), defaults.max_queue_depth);
    }

    #[test]
    fn overflow_is_refused_without_touching_the_queue() {
        let clock = AppClock::new(&AppClockConfig {
            max_queue_depth: 1,
            ..AppClockConfig::default()
        })
        .unwrap();
        let wakes = Arc::new(AtomicUsize::new(0));
        clock.schedule_absolute(5.0, Schedulable::callback(|_, _, _| Ok(None))).unwrap();
        clock.set_wake_hook({
            let wakes = wakes.clone();
            move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            }
        });

        let err = clock
            .schedule_absolute(1.0, Schedulable::callback(|_, _, _| Ok(None)))
            .unwrap_err();
        assert!(matches!(err, ClockError::QueueFull(_)));
        assert_eq!(clock.queue_len(), 1);
        assert_eq!(clock.next_time(), Some(5.0));
        assert_eq!(wakes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wake_hook_fires_only_when_head_moves() {
        let clock = AppClock::new_default();
        let wakes = Arc::new(AtomicUsize::new(0));
        clock.set_wake_hook({
            let wakes = wakes.clone();
            move || {
                wakes.fetch_add(1, Ordering::SeqCst);
            }
        });
        let noop = || Schedulable::callback(|_, _, _| Ok(None));
        clock.schedule_absolute(5.0, noop()).unwrap();
        clock.schedule_absolute(7.0, noop()).unwrap();
        clock.schedule_absolute(1.0, noop()).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);

        clock.clear_wake_hook();
        clock.schedule_absolute(0.5, noop()).unwrap();
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stopped_clock_refuses_work() {
        let clock = AppClock::new_default();
        clock.schedule_absolute(1.0, Schedulable::callback(|_, _, _| Ok(None))).unwrap();
        clock.stop().unwrap();
        assert_eq!(clock.queue_len(), 0);
        assert!(matches!(clock.beats(), Err(ClockError::NotRunning(_))));
        let err = clock
            .schedule(0.0, Schedulable::callback(|_, _, _| Ok(None)))
            .unwrap_err();
        assert!(matches!(err, ClockError::NotRunning(_)));
        assert_eq!(clock.advance(100.0), None);
    }

    #[test]
    fn non_finite_time_is_rejected() {
        let clock = AppClock::new_default();
        let err = clock
            .schedule_absolute(f64::INFINITY, Schedulable::callback(|_, _, _| Ok(None)))
            .unwrap_err();
        assert!(matches!(err, ClockError::InvalidTime(_)));
    }

    #[test]
    fn next_wait_is_zero_when_overdue() {
        let clock = AppClock::new_default();
        assert!(clock.next_wait().is_none());
        clock.schedule_absolute(0.0, Schedulable::callback(|_, _, _| Ok(None))).unwrap();
        assert_eq!(clock.next_wait(), Some(Duration::ZERO));
    }
}

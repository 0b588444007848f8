//! Process-wide execution context.
//!
//! Exactly one task runs at a time across every clock in the process. The
//! state here records which one, the logical time it was resumed at, the clock
//! it is bound to and the PRNG it draws from. Outside any task the "main"
//! context applies: its logical time tracks physical elapsed time, except
//! while a clock is dispatching an entry or while an external event is being
//! handled (see [`with_main_seconds`]), when it is pinned to that instant.
//!
//! The current frame and pins belong to whichever OS thread holds the run
//! lock. Other threads are outside any task by definition and see main.

use std::cell::Cell;
use std::mem;
use std::sync::LazyLock;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::clock::{Clock, ClockId, LogicalClock};
use super::error::ClockError;
use super::task::{Task, TaskId};
use crate::util::clock::elapsed;

/// Logical-time context of the running task.
pub(crate) struct Frame {
    pub task: Task,
    pub beats: f64,
    pub seconds: f64,
    pub clock: Option<Clock>,
    pub rng: StdRng,
}

struct ThreadState {
    current: Option<Frame>,
    main_rng: StdRng,
    main_pins: Vec<f64>,
}

impl ThreadState {
    fn frame(&self) -> Option<&Frame> {
        if holds_run_lock() {
            self.current.as_ref()
        } else {
            None
        }
    }

    fn main_seconds(&self) -> f64 {
        let pinned = if holds_run_lock() {
            self.main_pins.last().copied()
        } else {
            None
        };
        pinned.unwrap_or_else(elapsed)
    }
}

static RUN_LOCK: LazyLock<ReentrantMutex<()>> = LazyLock::new(|| ReentrantMutex::new(()));

static STATE: LazyLock<Mutex<ThreadState>> = LazyLock::new(|| {
    Mutex::new(ThreadState {
        current: None,
        main_rng: StdRng::from_os_rng(),
        main_pins: Vec::new(),
    })
});

thread_local! {
    static RUN_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Held while an entry is being dispatched. Reentrant on the owning thread so
/// a task may resume another task directly.
pub(crate) struct RunGuard {
    _lock: ReentrantMutexGuard<'static, ()>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        RUN_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

pub(crate) fn acquire_run() -> RunGuard {
    let lock = RUN_LOCK.lock();
    RUN_DEPTH.with(|depth| depth.set(depth.get() + 1));
    RunGuard { _lock: lock }
}

/// Whether the calling OS thread is currently dispatching an entry.
#[must_use]
pub fn holds_run_lock() -> bool {
    RUN_DEPTH.with(|depth| depth.get() > 0)
}

/// Installs a task frame as current and restores the previous one on exit.
///
/// If dropped without [`FrameScope::exit`] (unwinding), the previous frame is
/// still restored and the task frame is discarded.
pub(crate) struct FrameScope {
    previous: Option<Option<Frame>>,
}

impl FrameScope {
    pub fn enter(frame: Frame) -> Self {
        let previous = STATE.lock().current.replace(frame);
        Self {
            previous: Some(previous),
        }
    }

    /// Task that was current before this scope, `None` for main.
    pub fn previous_task(&self) -> Option<Task> {
        self.previous
            .as_ref()
            .and_then(|prev| prev.as_ref().map(|frame| frame.task.clone()))
    }

    /// Restore the previous frame and hand back the one this scope installed.
    pub fn exit(mut self) -> Option<Frame> {
        let previous = self.previous.take().flatten();
        mem::replace(&mut STATE.lock().current, previous)
    }
}

impl Drop for FrameScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            STATE.lock().current = previous;
        }
    }
}

struct PinGuard;

impl Drop for PinGuard {
    fn drop(&mut self) {
        STATE.lock().main_pins.pop();
    }
}

/// Run `f` with main logical time pinned to `seconds`, holding the run lock.
///
/// This is the hook every clock invokes right before it dispatches an entry.
pub(crate) fn dispatch_at<R>(seconds: f64, f: impl FnOnce() -> R) -> R {
    let _run = acquire_run();
    STATE.lock().main_pins.push(seconds);
    let _pin = PinGuard;
    f()
}

/// Handle an external event stamped at `seconds`.
///
/// Main logical time reads `seconds` for the duration of `f`, so anything
/// scheduled from `f` is placed relative to the event's timestamp.
///
/// # Errors
///
/// Returns `ClockError::TimeAhead` if `seconds` is later than the current
/// physical elapsed time, and `ClockError::InvalidTime` if it is not finite.
pub fn with_main_seconds<R>(seconds: f64, f: impl FnOnce() -> R) -> Result<R, ClockError> {
    if !seconds.is_finite() {
        return Err(ClockError::InvalidTime(seconds));
    }
    let now = elapsed();
    if seconds > now {
        return Err(ClockError::TimeAhead {
            requested: seconds,
            elapsed: now,
        });
    }
    Ok(dispatch_at(seconds, f))
}

/// The task currently running, if any.
#[must_use]
pub fn current_task() -> Option<Task> {
    STATE.lock().frame().map(|frame| frame.task.clone())
}

pub(crate) fn current_task_id() -> Option<TaskId> {
    STATE.lock().frame().map(|frame| frame.task.id())
}

/// Logical seconds of the calling context.
#[must_use]
pub fn logical_seconds() -> f64 {
    let state = STATE.lock();
    state
        .frame()
        .map_or_else(|| state.main_seconds(), |frame| frame.seconds)
}

/// Logical beats of the calling context; main counts beats in seconds.
#[must_use]
pub fn logical_beats() -> f64 {
    let state = STATE.lock();
    state
        .frame()
        .map_or_else(|| state.main_seconds(), |frame| frame.beats)
}

/// Clock the running task is bound to.
#[must_use]
pub fn current_clock() -> Option<Clock> {
    STATE.lock().frame().and_then(|frame| frame.clock.clone())
}

/// The running task's beats, if it is bound to the clock `id`.
pub(crate) fn frame_beats_on(id: ClockId) -> Option<f64> {
    let state = STATE.lock();
    let frame = state.frame()?;
    match &frame.clock {
        Some(clock) if clock.id() == id => Some(frame.beats),
        _ => None,
    }
}

/// Snapshot of `(beats, seconds, clock)` for the calling context.
pub(crate) fn snapshot() -> (f64, f64, Option<Clock>) {
    let state = STATE.lock();
    match state.frame() {
        Some(frame) => (frame.beats, frame.seconds, frame.clock.clone()),
        None => {
            let seconds = state.main_seconds();
            (seconds, seconds, None)
        }
    }
}

/// Re-bind the running task's frame to `clock`, re-deriving beats.
pub(crate) fn rebind_current(clock: &Clock) {
    if !holds_run_lock() {
        return;
    }
    let Some(seconds) = STATE.lock().current.as_ref().map(|frame| frame.seconds) else {
        return;
    };
    // Converting reads the clock's own lock; never hold STATE across it.
    let beats = clock.secs2beats(seconds);
    if let Some(frame) = STATE.lock().current.as_mut() {
        frame.beats = beats;
        frame.clock = Some(clock.clone());
    }
}

/// Main logical time: pinned while dispatching, physical elapsed otherwise.
#[must_use]
pub fn main_seconds() -> f64 {
    STATE.lock().main_seconds()
}

/// Run `f` against the active PRNG: the running task's, or main's.
///
/// `f` must not call back into this module.
pub fn with_rng<R>(f: impl FnOnce(&mut StdRng) -> R) -> R {
    let dispatching = holds_run_lock();
    let mut guard = STATE.lock();
    let state = &mut *guard;
    match state.current.as_mut() {
        Some(frame) if dispatching => f(&mut frame.rng),
        _ => f(&mut state.main_rng),
    }
}

/// Uniform sample in `[0, 1)` from the active PRNG.
#[must_use]
pub fn random() -> f64 {
    with_rng(|rng| rng.random())
}

/// Reseed main's PRNG so tasks created from main afterwards are reproducible.
pub fn seed_main_rng(seed: u64) {
    STATE.lock().main_rng = StdRng::seed_from_u64(seed);
}

/// Derive a seed for a new task from the active PRNG.
pub(crate) fn child_seed() -> u64 {
    with_rng(|rng| rng.random())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn main_time_tracks_elapsed_outside_dispatch() {
        // Holding the run lock keeps other tests' dispatches from pinning main time.
        let _run = acquire_run();
        let before = elapsed();
        let main = main_seconds();
        assert!(main >= before);
        assert!(current_task().is_none());
    }

    #[test]
    fn with_main_seconds_pins_and_unpins() {
        let _run = acquire_run();
        let stamp = elapsed() - 5.0;
        let seen = with_main_seconds(stamp, || (main_seconds(), logical_seconds())).unwrap();
        assert!((seen.0 - stamp).abs() < f64::EPSILON);
        assert!((seen.1 - stamp).abs() < f64::EPSILON);
        assert!(main_seconds() > stamp + 4.0);
    }

    #[test]
    fn with_main_seconds_rejects_future() {
        let err = with_main_seconds(elapsed() + 60.0, || ()).unwrap_err();
        assert!(matches!(err, ClockError::TimeAhead { .. }));
    }

    #[test]
    fn run_lock_is_reentrant() {
        let _outer = acquire_run();
        let inner = acquire_run();
        assert!(holds_run_lock());
        drop(inner);
        assert!(holds_run_lock());
    }
}

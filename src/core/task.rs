//! Suspendable tasks.
//!
//! A [`Task`] wraps a [`Routine`]: a step function the clocks drive one step
//! per resume. Each step returns a [`Yield`] saying whether the task wants to
//! run again after a delay, park indefinitely, finish, rewind, or terminate.
//! State a routine needs across steps lives in the routine itself (a closure's
//! captures or a struct's fields), so a suspended task picks up exactly where
//! it left off.
//!
//! Every resume installs the task as the process-wide current task with its
//! own logical time and PRNG, and restores the previous context on the way
//! out, including when the routine fails or panics.
//!
//! ```rust,ignore
//! use synth_clock::core::{Task, Yield};
//!
//! let task = Task::from_fn({
//!     let mut count = 0;
//!     move |cx| {
//!         count += 1;
//!         tracing::info!(beats = cx.beats(), count, "tick");
//!         Ok(if count < 4 { Yield::Wait(1.0) } else { Yield::Done })
//!     }
//! });
//! task.play(&clock, None)?;
//! ```

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::clock::{Clock, LogicalClock, Quant};
use super::error::{ClockError, TaskError};
use super::thread_state::{self, Frame, FrameScope};

/// Process-unique identifier shared by tasks and callbacks.
pub type TaskId = u64;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_task_id() -> TaskId {
    NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Lifecycle of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Constructed; the underlying work has not started.
    Init,
    /// Executing a step.
    Running,
    /// Yielded and waiting to be resumed.
    Suspended,
    /// Finished; cannot be resumed.
    Done,
}

impl TaskState {
    const fn to_u8(self) -> u8 {
        match self {
            Self::Init => 0,
            Self::Running => 1,
            Self::Suspended => 2,
            Self::Done => 3,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::Suspended,
            _ => Self::Done,
        }
    }
}

/// Outcome of one routine step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Yield {
    /// Suspend and resume `delay` units after this step's scheduled time.
    Wait(f64),
    /// Suspend without rescheduling; something else must wake the task.
    Hang,
    /// Normal completion.
    Done,
    /// Rewind: the next resume starts the underlying work over.
    Reset,
    /// Force-terminate with an optional terminal value.
    Stop(Option<f64>),
}

/// One step of a task's underlying work.
pub trait Routine: Send + 'static {
    /// Run until the next suspension point.
    ///
    /// # Errors
    ///
    /// Any error is treated as a fault: it is logged by the resuming clock
    /// and the task is marked `Done`.
    fn resume(&mut self, cx: &mut TaskContext) -> anyhow::Result<Yield>;
}

impl<F> Routine for F
where
    F: FnMut(&mut TaskContext) -> anyhow::Result<Yield> + Send + 'static,
{
    fn resume(&mut self, cx: &mut TaskContext) -> anyhow::Result<Yield> {
        self(cx)
    }
}

/// What a routine sees while it runs.
///
/// Time and randomness come from the process-wide context the resume
/// installed, so they agree with what clocks see when scheduled from here.
pub struct TaskContext {
    task: Task,
}

impl TaskContext {
    /// The running task.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// Logical beats this step was resumed at, on the task's own clock.
    #[must_use]
    pub fn beats(&self) -> f64 {
        thread_state::logical_beats()
    }

    /// Logical seconds this step was resumed at.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        thread_state::logical_seconds()
    }

    /// Clock the task is bound to.
    #[must_use]
    pub fn clock(&self) -> Option<Clock> {
        thread_state::current_clock()
    }

    /// Uniform sample in `[0, 1)` from the task's own PRNG.
    #[must_use]
    pub fn random(&self) -> f64 {
        thread_state::random()
    }

    /// Uniform sample in `[low, high)` from the task's own PRNG.
    #[must_use]
    pub fn random_range(&self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        thread_state::with_rng(|rng| rng.random_range(low..high))
    }
}

type Factory = Box<dyn FnMut() -> Box<dyn Routine> + Send>;

const NO_REQUEST: u8 = 0;
const RESET_REQUESTED: u8 = 1;
const STOP_REQUESTED: u8 = 2;

struct TaskBody {
    factory: Factory,
    routine: Option<Box<dyn Routine>>,
    rng: Option<StdRng>,
}

struct TaskCell {
    id: TaskId,
    name: OnceLock<String>,
    state: AtomicU8,
    running: AtomicBool,
    request: AtomicU8,
    beats: AtomicU64,
    seconds: AtomicU64,
    clock: RwLock<Option<Clock>>,
    parent: Mutex<Option<Task>>,
    last_value: Mutex<Option<f64>>,
    body: Mutex<TaskBody>,
}

/// Handle to a suspendable unit of work. Cloning shares the task.
#[derive(Clone)]
pub struct Task {
    cell: Arc<TaskCell>,
}

/// Clears the running flag on every exit path.
struct RunningFlag<'a>(&'a AtomicBool);

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Task {
    /// Create a task whose underlying work is built by `factory`.
    ///
    /// The factory runs on the first resume and again after every rewind,
    /// so each run starts from fresh routine state.
    pub fn new<F, R>(mut factory: F) -> Self
    where
        F: FnMut() -> R + Send + 'static,
        R: Routine,
    {
        let seed = thread_state::child_seed();
        let seconds = thread_state::logical_seconds();
        let clock = thread_state::current_clock();
        let beats = clock.as_ref().map_or(seconds, |c| c.secs2beats(seconds));
        Self {
            cell: Arc::new(TaskCell {
                id: next_task_id(),
                name: OnceLock::new(),
                state: AtomicU8::new(TaskState::Init.to_u8()),
                running: AtomicBool::new(false),
                request: AtomicU8::new(NO_REQUEST),
                beats: AtomicU64::new(beats.to_bits()),
                seconds: AtomicU64::new(seconds.to_bits()),
                clock: RwLock::new(clock),
                parent: Mutex::new(None),
                last_value: Mutex::new(None),
                body: Mutex::new(TaskBody {
                    factory: Box::new(move || Box::new(factory()) as Box<dyn Routine>),
                    routine: None,
                    rng: Some(StdRng::seed_from_u64(seed)),
                }),
            }),
        }
    }

    /// Create a task from a step closure; rewinding restarts from a fresh
    /// clone of the closure as it was passed in.
    pub fn from_fn<F>(step: F) -> Self
    where
        F: FnMut(&mut TaskContext) -> anyhow::Result<Yield> + Clone + Send + 'static,
    {
        Self::new(move || step.clone())
    }

    /// Attach a name used in logs. Only the first name sticks.
    #[must_use]
    pub fn with_name(self, name: impl Into<String>) -> Self {
        let _ = self.cell.name.set(name.into());
        self
    }

    /// Process-unique identifier.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Name given with [`Task::with_name`].
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.cell.name.get().map(String::as_str)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.cell.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: TaskState) {
        self.cell.state.store(state.to_u8(), Ordering::Release);
    }

    fn is_current(&self) -> bool {
        thread_state::current_task_id() == Some(self.id())
    }

    /// Logical beats on the task's own clock.
    #[must_use]
    pub fn beats(&self) -> f64 {
        if self.is_current() {
            return thread_state::logical_beats();
        }
        f64::from_bits(self.cell.beats.load(Ordering::Acquire))
    }

    /// Logical seconds the task was last resumed at.
    #[must_use]
    pub fn seconds(&self) -> f64 {
        if self.is_current() {
            return thread_state::logical_seconds();
        }
        f64::from_bits(self.cell.seconds.load(Ordering::Acquire))
    }

    fn store_time(&self, beats: f64, seconds: f64) {
        self.cell.beats.store(beats.to_bits(), Ordering::Release);
        self.cell.seconds.store(seconds.to_bits(), Ordering::Release);
    }

    /// Clock the task is bound to.
    #[must_use]
    pub fn clock(&self) -> Option<Clock> {
        self.cell.clock.read().clone()
    }

    /// Re-bind to `clock`, re-deriving beats from the task's seconds.
    pub fn set_clock(&self, clock: &Clock) {
        *self.cell.clock.write() = Some(clock.clone());
        if self.is_current() {
            thread_state::rebind_current(clock);
        } else {
            let seconds = self.seconds();
            self.store_time(clock.secs2beats(seconds), seconds);
        }
    }

    /// The task that resumed this one; only set while this task runs.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.cell.parent.lock().clone()
    }

    /// Replace the task's PRNG with one seeded from `seed`.
    ///
    /// Ignored with a debug log if the task is mid-step on the running chain
    /// but not the current task.
    pub fn set_seed(&self, seed: u64) {
        if self.is_current() {
            thread_state::with_rng(|rng| *rng = StdRng::seed_from_u64(seed));
            return;
        }
        match self.cell.body.try_lock() {
            Some(mut body) => body.rng = Some(StdRng::seed_from_u64(seed)),
            None => debug!(task = self.id(), "seed ignored while the task is running"),
        }
    }

    /// Last delay yielded, or the terminal value after a forced stop.
    #[must_use]
    pub fn last_value(&self) -> Option<f64> {
        *self.cell.last_value.lock()
    }

    /// Resume the task at the given logical time on behalf of `clock`.
    ///
    /// Returns the delay after which the task wants to run again, or `None`
    /// if it finished, rewound, or parked itself.
    ///
    /// # Errors
    ///
    /// `TaskError::Finished` or `TaskError::AlreadyRunning` if the task cannot
    /// be resumed; `TaskError::Fault`/`Panicked` if its work failed, in which
    /// case the task is now `Done`.
    pub fn awake(&self, beats: f64, seconds: f64, clock: &Clock) -> Result<Option<f64>, TaskError> {
        self.resume_with(beats, seconds, Some(clock.clone()))
    }

    /// Resume the task directly, at the caller's logical time.
    ///
    /// # Errors
    ///
    /// Same as [`Task::awake`].
    pub fn next(&self) -> Result<Option<f64>, TaskError> {
        let (beats, seconds, clock) = thread_state::snapshot();
        self.resume_with(beats, seconds, clock)
    }

    fn resume_with(
        &self,
        beats: f64,
        seconds: f64,
        resumed_by: Option<Clock>,
    ) -> Result<Option<f64>, TaskError> {
        let _run = thread_state::acquire_run();
        let cell = &*self.cell;
        if cell.running.swap(true, Ordering::AcqRel) {
            return Err(TaskError::AlreadyRunning(cell.id));
        }
        let _running = RunningFlag(&cell.running);
        if self.state() == TaskState::Done {
            return Err(TaskError::Finished(cell.id));
        }

        let mut body = cell.body.lock();
        let clock = {
            let mut bound = cell.clock.write();
            if bound.is_none() {
                bound.clone_from(&resumed_by);
            }
            bound.clone()
        };
        let beats = match (&clock, &resumed_by) {
            (Some(own), Some(by)) if own.id() != by.id() => own.secs2beats(seconds),
            _ => beats,
        };
        self.store_time(beats, seconds);

        let rng = body
            .rng
            .take()
            .unwrap_or_else(|| StdRng::seed_from_u64(cell.id));
        let scope = FrameScope::enter(Frame {
            task: self.clone(),
            beats,
            seconds,
            clock,
            rng,
        });
        *cell.parent.lock() = scope.previous_task();
        self.set_state(TaskState::Running);

        if body.routine.is_none() {
            body.routine = Some((body.factory)());
        }
        let mut cx = TaskContext { task: self.clone() };
        let outcome = body.routine.as_mut().map_or(Ok(Ok(Yield::Done)), |routine| {
            catch_unwind(AssertUnwindSafe(|| routine.resume(&mut cx)))
        });

        if let Some(frame) = scope.exit() {
            self.store_time(frame.beats, frame.seconds);
            body.rng = Some(frame.rng);
        }
        cell.parent.lock().take();

        let outcome = match outcome {
            Ok(Ok(step)) => Ok(step),
            Ok(Err(source)) => Err(TaskError::Fault { id: cell.id, source }),
            Err(payload) => Err(TaskError::Panicked {
                id: cell.id,
                message: panic_message(payload.as_ref()),
            }),
        };
        let outcome = match (cell.request.swap(NO_REQUEST, Ordering::AcqRel), outcome) {
            (STOP_REQUESTED, Ok(_)) => Ok(Yield::Stop(None)),
            (RESET_REQUESTED, Ok(_)) => Ok(Yield::Reset),
            (_, outcome) => outcome,
        };

        match outcome {
            Ok(Yield::Wait(delay)) => {
                self.set_state(TaskState::Suspended);
                *cell.last_value.lock() = Some(delay);
                Ok(Some(delay))
            }
            Ok(Yield::Hang) => {
                self.set_state(TaskState::Suspended);
                Ok(None)
            }
            Ok(Yield::Done) => {
                body.routine = None;
                self.set_state(TaskState::Done);
                debug!(task = cell.id, "task completed");
                Ok(None)
            }
            Ok(Yield::Reset) => {
                body.routine = None;
                self.set_state(TaskState::Init);
                debug!(task = cell.id, "task rewound");
                Ok(None)
            }
            Ok(Yield::Stop(value)) => {
                body.routine = None;
                *cell.last_value.lock() = value;
                self.set_state(TaskState::Done);
                debug!(task = cell.id, ?value, "task terminated");
                Ok(None)
            }
            Err(err) => {
                body.routine = None;
                self.set_state(TaskState::Done);
                Err(err)
            }
        }
    }

    /// Bind to `clock` and schedule the first resume, aligned to `quant` if
    /// given, otherwise immediately.
    ///
    /// # Errors
    ///
    /// Fails if the task is finished or the clock refuses the entry.
    pub fn play(&self, clock: &Clock, quant: Option<Quant>) -> Result<(), ClockError> {
        if self.state() == TaskState::Done {
            return Err(TaskError::Finished(self.id()).into());
        }
        self.set_clock(clock);
        match quant {
            Some(quant) => {
                let at = quant.next_time_on_grid(clock)?;
                clock.schedule_absolute(at, self.clone())
            }
            None => clock.schedule(0.0, self.clone()),
        }
    }

    /// Rewind so the next resume starts the work over. A running task
    /// rewinds when its current step returns.
    pub fn reset(&self) {
        if self.cell.running.load(Ordering::Acquire) {
            self.cell.request.store(RESET_REQUESTED, Ordering::Release);
            return;
        }
        self.cell.body.lock().routine = None;
        self.set_state(TaskState::Init);
    }

    /// Terminate; later resumes fail. A running task stops when its current
    /// step returns.
    pub fn stop(&self) {
        if self.cell.running.load(Ordering::Acquire) {
            self.cell.request.store(STOP_REQUESTED, Ordering::Release);
            return;
        }
        self.cell.body.lock().routine = None;
        self.set_state(TaskState::Done);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".into())
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl Eq for Task {}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

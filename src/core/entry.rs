//! What clocks hold in their queues.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::{error, warn};

use super::clock::{Clock, LogicalClock};
use super::error::TaskError;
use super::task::{next_task_id, Task, TaskId};
use super::thread_state;

type CallbackFn = dyn FnMut(f64, f64, &Clock) -> anyhow::Result<Option<f64>> + Send;

/// A plain function scheduled on a clock. It has no task context of its own:
/// while it runs, main logical time reads its scheduled time.
pub struct Callback {
    id: TaskId,
    f: Box<CallbackFn>,
}

impl Callback {
    fn call(&mut self, beats: f64, seconds: f64, clock: &Clock) -> Result<Option<f64>, TaskError> {
        let id = self.id;
        match catch_unwind(AssertUnwindSafe(|| (self.f)(beats, seconds, clock))) {
            Ok(Ok(delay)) => Ok(delay),
            Ok(Err(source)) => Err(TaskError::Fault { id, source }),
            Err(payload) => Err(TaskError::Panicked {
                id,
                message: payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_default(),
            }),
        }
    }
}

/// An entry in a clock's queue: a task, or a callback.
pub enum Schedulable {
    /// A suspendable task.
    Task(Task),
    /// A callback resumed with `(beats, seconds, clock)`; returning a delay
    /// reschedules it.
    Callback(Callback),
}

impl Schedulable {
    /// Wrap a function as a schedulable entry.
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(f64, f64, &Clock) -> anyhow::Result<Option<f64>> + Send + 'static,
    {
        Self::Callback(Callback {
            id: next_task_id(),
            f: Box::new(f),
        })
    }

    /// Identifier used in logs.
    #[must_use]
    pub fn id(&self) -> TaskId {
        match self {
            Self::Task(task) => task.id(),
            Self::Callback(callback) => callback.id,
        }
    }

    /// Resume the entry; the uniform contract every clock drives.
    ///
    /// # Errors
    ///
    /// Propagates the task's or callback's failure.
    pub fn awake(&mut self, beats: f64, seconds: f64, clock: &Clock) -> Result<Option<f64>, TaskError> {
        match self {
            Self::Task(task) => task.awake(beats, seconds, clock),
            Self::Callback(callback) => callback.call(beats, seconds, clock),
        }
    }
}

impl From<Task> for Schedulable {
    fn from(task: Task) -> Self {
        Self::Task(task)
    }
}

impl fmt::Debug for Schedulable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(task) => f.debug_tuple("Task").field(task).finish(),
            Self::Callback(callback) => f.debug_tuple("Callback").field(&callback.id).finish(),
        }
    }
}

/// Run one due entry for `clock`, returning where to re-insert it, if anywhere.
///
/// Failures are logged here and never reach the clock's loop.
pub(crate) fn dispatch(
    mut entry: Schedulable,
    time: f64,
    beats: f64,
    seconds: f64,
    clock: &Clock,
) -> Option<(f64, Schedulable)> {
    let outcome = thread_state::dispatch_at(seconds, || entry.awake(beats, seconds, clock));
    match outcome {
        Ok(Some(delay)) if delay.is_finite() => match rebound_clock(&entry, clock) {
            Some((own, beats)) => {
                let entry_id = entry.id();
                if let Err(err) = own.schedule_absolute(beats + delay, entry) {
                    warn!(clock = own.name(), entry = entry_id, error = %err, "re-bound task could not be rescheduled; dropped");
                }
                None
            }
            None => Some((time + delay, entry)),
        },
        Ok(Some(delay)) => {
            warn!(clock = clock.name(), entry = entry.id(), delay, "non-finite delay; entry dropped");
            None
        }
        Ok(None) => None,
        Err(err) if err.is_fault() => {
            error!(
                clock = clock.name(),
                entry = entry.id(),
                time,
                error = %err,
                "scheduled entry faulted; treating it as complete"
            );
            None
        }
        Err(err) => {
            warn!(clock = clock.name(), entry = entry.id(), error = %err, "entry could not be resumed; dropped");
            None
        }
    }
}

/// The clock a task entry re-bound itself to during its step, with the
/// task's beats on that clock, if it is not `clock`.
fn rebound_clock(entry: &Schedulable, clock: &Clock) -> Option<(Clock, f64)> {
    let Schedulable::Task(task) = entry else {
        return None;
    };
    let own = task.clock()?;
    if own.id() == clock.id() {
        return None;
    }
    let beats = task.beats();
    Some((own, beats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AppClock;

    #[test]
    fn callback_reschedules_with_delay() {
        let clock: Clock = AppClock::new_default().into();
        let mut calls = 0;
        let entry = Schedulable::callback(move |_, _, _| {
            calls += 1;
            Ok((calls < 2).then_some(0.25))
        });
        let (next, entry) = dispatch(entry, 1.0, 1.0, 1.0, &clock).unwrap();
        assert!((next - 1.25).abs() < f64::EPSILON);
        assert!(dispatch(entry, next, next, next, &clock).is_none());
    }

    #[test]
    fn failing_callback_is_dropped() {
        let clock: Clock = AppClock::new_default().into();
        let entry = Schedulable::callback(|_, _, _| Err(anyhow::anyhow!("bad")));
        assert!(dispatch(entry, 0.0, 0.0, 0.0, &clock).is_none());

        let entry = Schedulable::callback(|_, _, _| panic!("worse"));
        assert!(dispatch(entry, 0.0, 0.0, 0.0, &clock).is_none());
    }

    #[test]
    fn rebound_task_is_rescheduled_on_its_new_clock() {
        use crate::core::{Task, Yield};

        let home = AppClock::new_default();
        let away = AppClock::new_default();
        let task = Task::from_fn({
            let away: Clock = away.clone().into();
            move |cx| {
                cx.task().set_clock(&away);
                Ok(Yield::Wait(2.0))
            }
        });
        task.set_clock(&home.clone().into());

        let again = dispatch(Schedulable::Task(task), 1.0, 1.0, 1.0, &home.clone().into());
        assert!(again.is_none());
        assert_eq!(home.queue_len(), 0);
        assert_eq!(away.next_time(), Some(3.0));
    }

    #[test]
    fn callback_sees_pinned_main_time() {
        let clock: Clock = AppClock::new_default().into();
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(None));
        let entry = Schedulable::callback({
            let seen = seen.clone();
            move |_, _, _| {
                *seen.lock() = Some(thread_state::main_seconds());
                Ok(None)
            }
        });
        dispatch(entry, 0.5, 0.5, 0.5, &clock);
        assert_eq!(*seen.lock(), Some(0.5));
    }
}

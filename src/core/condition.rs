//! Parking tasks until a test passes.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::clock::{Clock, LogicalClock};
use super::task::{Task, TaskContext, Yield};
use super::tempo_clock::TempoClock;

type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

enum Test {
    Value(bool),
    Func(Predicate),
}

struct ConditionState {
    test: Test,
    waiting: Vec<Task>,
}

/// A set of parked tasks plus the test that lets them through.
///
/// A task calls [`Condition::wait`] (or [`Condition::hang`]) from inside its
/// step and returns the resulting [`Yield`]. Waking reschedules every parked
/// task on its own clock, zero delay, from the waker's logical time.
#[derive(Clone)]
pub struct Condition {
    inner: Arc<Mutex<ConditionState>>,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Condition {
    /// Condition with a fixed test value.
    #[must_use]
    pub fn new(value: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ConditionState {
                test: Test::Value(value),
                waiting: Vec::new(),
            })),
        }
    }

    /// Condition whose test is evaluated on demand.
    pub fn with_predicate<F>(predicate: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(Mutex::new(ConditionState {
                test: Test::Func(Arc::new(predicate)),
                waiting: Vec::new(),
            })),
        }
    }

    /// Replace the test with a fixed value.
    pub fn set_test(&self, value: bool) {
        self.inner.lock().test = Test::Value(value);
    }

    /// Replace the test with a predicate.
    pub fn set_predicate<F>(&self, predicate: F)
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.inner.lock().test = Test::Func(Arc::new(predicate));
    }

    /// Evaluate the test. A predicate runs outside the internal lock.
    #[must_use]
    pub fn test(&self) -> bool {
        let predicate = match &self.inner.lock().test {
            Test::Value(value) => return *value,
            Test::Func(predicate) => Arc::clone(predicate),
        };
        predicate()
    }

    /// Number of parked tasks.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Pass straight through if the test holds, otherwise park the running
    /// task. Return the result from the step.
    pub fn wait(&self, cx: &TaskContext) -> Yield {
        if self.test() {
            return Yield::Wait(0.0);
        }
        self.park(cx.task());
        Yield::Hang
    }

    /// Park the running task unconditionally.
    pub fn hang(&self, cx: &TaskContext) -> Yield {
        self.park(cx.task());
        Yield::Hang
    }

    fn park(&self, task: &Task) {
        debug!(task = task.id(), "task parked on condition");
        self.inner.lock().waiting.push(task.clone());
    }

    /// Wake every parked task if the test holds.
    pub fn signal(&self) {
        if self.test() {
            self.wake_all();
        }
    }

    /// Wake every parked task regardless of the test.
    pub fn unhang(&self) {
        self.wake_all();
    }

    fn wake_all(&self) {
        let tasks = std::mem::take(&mut self.inner.lock().waiting);
        for task in tasks {
            let clock = match task.clock() {
                Some(clock) => clock,
                None => match TempoClock::default_clock() {
                    Ok(clock) => Clock::Tempo(clock),
                    Err(err) => {
                        warn!(task = task.id(), error = %err, "no clock to wake parked task on");
                        continue;
                    }
                },
            };
            if let Err(err) = clock.schedule(0.0, task.clone()) {
                warn!(task = task.id(), clock = clock.name(), error = %err, "could not wake parked task");
            }
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("waiting", &self.waiting())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::core::AppClock;

    #[test]
    fn predicate_is_evaluated_each_time() {
        let flag = Arc::new(AtomicBool::new(false));
        let cond = Condition::with_predicate({
            let flag = flag.clone();
            move || flag.load(Ordering::SeqCst)
        });
        assert!(!cond.test());
        flag.store(true, Ordering::SeqCst);
        assert!(cond.test());
    }

    #[test]
    fn signal_respects_the_test_and_unhang_does_not() {
        let clock = AppClock::new_default();
        let cond = Condition::new(false);
        let task = Task::from_fn({
            let cond = cond.clone();
            move |cx| Ok(cond.wait(cx))
        });
        task.set_clock(&clock.clone().into());
        task.next().unwrap();
        assert_eq!(cond.waiting(), 1);

        cond.signal();
        assert_eq!(cond.waiting(), 1);
        assert_eq!(clock.queue_len(), 0);

        cond.unhang();
        assert_eq!(cond.waiting(), 0);
        assert_eq!(clock.queue_len(), 1);
    }

    #[test]
    fn wait_passes_through_when_true() {
        let cond = Condition::new(true);
        let task = Task::from_fn({
            let cond = cond.clone();
            move |cx| Ok(cond.wait(cx))
        });
        assert_eq!(task.next().unwrap(), Some(0.0));
        assert_eq!(cond.waiting(), 0);
    }
}

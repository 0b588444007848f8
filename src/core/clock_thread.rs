//! Run loop shared by the threaded clocks.
//!
//! A clock owns one mutex guarding its queue and run flag, plus one condvar.
//! Producers (`insert`) notify only when the queue head changes. The loop
//! thread is the only consumer; it releases the lock while an entry runs so
//! the entry may schedule on the same clock.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::clock::{Clock, ClockId};
use super::entry::{dispatch, Schedulable};
use super::error::ClockError;
use crate::infra::queue::memory::InMemoryQueue;

/// Longest single park; the loop re-evaluates after it anyway.
const MAX_PARK_SECS: f64 = 60.0;

/// How a clock maps its own time units onto physical time.
pub(crate) trait TimeBasis: Send + Sync + 'static {
    /// Physical seconds until `time` (clock units) comes due; `<= 0` if due.
    fn seconds_until(&self, time: f64) -> f64;

    /// `(beats, seconds)` handed to an entry scheduled at `time`.
    fn awake_times(&self, time: f64) -> (f64, f64);
}

struct LoopState {
    queue: InMemoryQueue<Schedulable>,
    running: bool,
}

pub(crate) struct ClockCore<B> {
    pub id: ClockId,
    pub name: String,
    pub basis: B,
    state: Mutex<LoopState>,
    wake: Condvar,
}

impl<B: TimeBasis> ClockCore<B> {
    pub fn new(id: ClockId, name: String, max_queue_depth: usize, basis: B) -> Self {
        Self {
            id,
            name,
            basis,
            state: Mutex::new(LoopState {
                queue: InMemoryQueue::new(max_queue_depth),
                running: true,
            }),
            wake: Condvar::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn ensure_running(&self) -> Result<(), ClockError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ClockError::NotRunning(self.name.clone()))
        }
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Insert under the lock, waking the loop if the head changed.
    pub fn insert(&self, time: f64, entry: Schedulable) -> Result<(), ClockError> {
        if !time.is_finite() {
            return Err(ClockError::InvalidTime(time));
        }
        let mut state = self.state.lock();
        if !state.running {
            return Err(ClockError::NotRunning(self.name.clone()));
        }
        let previous_head = state.queue.peek_seq();
        let entry_id = entry.id();
        match state.queue.push(time, entry) {
            Ok(seq) => {
                if state.queue.peek_seq() != previous_head {
                    self.wake.notify_one();
                }
                debug!(clock = %self.name, entry = entry_id, time, seq, "entry scheduled");
                Ok(())
            }
            Err(err) => {
                warn!(clock = %self.name, entry = entry_id, time, error = %err, "queue full; entry dropped");
                Err(err)
            }
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        debug!(clock = %self.name, dropped, "queue cleared");
    }

    /// Wake the loop so it re-reads the time basis.
    pub fn notify(&self) {
        let _state = self.state.lock();
        self.wake.notify_all();
    }

    /// Flip the run flag and discard the queue. Returns whether it was running.
    pub fn request_stop(&self) -> bool {
        let mut state = self.state.lock();
        let was_running = std::mem::replace(&mut state.running, false);
        state.queue.clear();
        self.wake.notify_all();
        was_running
    }

    /// The loop body run on the clock's own thread until stopped.
    pub fn run(&self, clock: &Clock) {
        info!(clock = %self.name, id = self.id, "clock thread started");
        let mut state = self.state.lock();
        loop {
            if !state.running {
                break;
            }
            let Some(due) = state.queue.peek_time() else {
                self.wake.wait(&mut state);
                continue;
            };
            let wait = self.basis.seconds_until(due);
            if wait > 0.0 {
                let park = Duration::from_secs_f64(wait.min(MAX_PARK_SECS));
                self.wake.wait_for(&mut state, park);
                continue;
            }
            let Some((time, entry)) = state.queue.pop() else {
                continue;
            };
            let (beats, seconds) = self.basis.awake_times(time);
            let again = MutexGuard::unlocked(&mut state, || dispatch(entry, time, beats, seconds, clock));
            if let Some((next, entry)) = again {
                if !state.running {
                    continue;
                }
                let entry_id = entry.id();
                if let Err(err) = state.queue.push(next, entry) {
                    warn!(clock = %self.name, entry = entry_id, error = %err, "queue full; rescheduled entry dropped");
                }
            }
        }
        drop(state);
        info!(clock = %self.name, id = self.id, "clock thread exited");
    }
}

/// Spawn a named clock thread.
pub(crate) fn spawn_clock_thread<F>(name: &str, id: ClockId, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{name}-{id}"))
        .spawn(body)
}

//! Clocks, tasks, and the shared execution context.

pub mod app_clock;
pub mod clock;
pub(crate) mod clock_thread;
pub mod condition;
pub mod entry;
pub mod error;
pub mod system_clock;
pub mod task;
pub mod tempo_clock;
pub mod thread_state;
pub mod wire;

pub use app_clock::AppClock;
pub use clock::{next_time_on_grid, Clock, ClockId, LogicalClock, Quant};
pub use condition::Condition;
pub use entry::{Callback, Schedulable};
pub use error::{AppResult, ClockError, TaskError};
pub use system_clock::SystemClock;
pub use task::{Routine, Task, TaskContext, TaskId, TaskState, Yield};
pub use tempo_clock::TempoClock;
pub use thread_state::{
    current_clock, current_task, holds_run_lock, logical_beats, logical_seconds, main_seconds,
    random, seed_main_rng, with_main_seconds, with_rng,
};
pub use wire::{seconds_to_wire, wall_time_to_wire, WireClock};

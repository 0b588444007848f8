//! # Synth Clock
//!
//! Clocks and suspendable tasks for a real-time synthesis client.
//!
//! Three clocks share one contract ([`LogicalClock`]):
//!
//! - [`SystemClock`] schedules by elapsed seconds on a dedicated thread, and
//!   keeps an offset to 32.32 fixed-point wire time fresh for timestamped
//!   messages.
//! - [`TempoClock`] schedules by beats at a changeable tempo, also on its own
//!   thread. Changing tempo never moves the current beat.
//! - [`AppClock`] has no thread: the host advances it from its own event loop,
//!   or hands it to [`runtime::AppClockDriver`] on tokio.
//!
//! Work is scheduled as a [`Task`] (a resumable step function returning a
//! [`Yield`]) or a plain callback. Only one entry runs at a time across the
//! whole process, and while it runs every time query answers with its
//! *logical* time: the instant it was scheduled for, not the instant it
//! happened to wake. Timing jitter therefore never accumulates.
//!
//! ```rust,no_run
//! use synth_clock::{LogicalClock, TempoClock, Task, Yield};
//!
//! # fn main() -> Result<(), synth_clock::ClockError> {
//! let clock = TempoClock::new(2.0)?;
//! let task = Task::from_fn(|cx| {
//!     println!("beat {}", cx.beats());
//!     Ok(Yield::Wait(1.0))
//! });
//! task.play(&clock.clone().into(), None)?;
//! # clock.stop()?;
//! # Ok(())
//! # }
//! ```
//!
//! External events (for example an incoming message stamped with its arrival
//! time) are handled inside [`with_main_seconds`], so anything they schedule
//! is placed relative to the event rather than to whenever the handler ran.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Clocks, tasks, and the shared execution context.
pub mod core;
/// Configuration models for clocks.
pub mod config;
/// Builders to construct clocks from configuration.
pub mod builders;
/// Storage backing the clocks' queues.
pub mod infra;
/// Runtime adapters.
pub mod runtime;
/// Shared utilities.
pub mod util;

pub use crate::builders::{build_clocks, ClockSet};
pub use crate::config::{AppClockConfig, ClockConfig, DriveMode, SystemClockConfig, TempoClockConfig};
pub use crate::core::{
    current_task, logical_seconds, main_seconds, with_main_seconds, AppClock, AppResult, Clock,
    ClockError, Condition, LogicalClock, Quant, Schedulable, SystemClock, Task, TaskContext,
    TaskError, TaskState, TempoClock, Yield,
};

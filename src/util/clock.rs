//! Physical time sources shared by every clock.
//!
//! Elapsed time is measured from a process-wide origin captured on first use,
//! so every clock in the process agrees on what "now" means.

use std::sync::LazyLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

static PROCESS_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// The monotonic instant all elapsed times are measured from.
#[must_use]
pub fn process_origin() -> Instant {
    *PROCESS_ORIGIN
}

/// Monotonic seconds elapsed since [`process_origin`].
#[must_use]
pub fn elapsed() -> f64 {
    PROCESS_ORIGIN.elapsed().as_secs_f64()
}

/// Wall-clock time of day as a duration since the Unix epoch.
///
/// A clock set before 1970 reads as zero.
#[must_use]
pub fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
}

/// Physical seconds from now until the elapsed instant `at`, clamped at zero.
#[must_use]
pub fn seconds_until(at: f64) -> f64 {
    (at - elapsed()).max(0.0)
}

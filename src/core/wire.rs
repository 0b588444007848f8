//! 32.32 fixed-point wire time and drift correction.
//!
//! Wire time counts seconds since 1900-01-01 in the upper 32 bits and the
//! fraction in the lower 32 bits. Elapsed time is mapped onto it through an
//! offset that a background thread re-measures against the wall clock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use crate::util::clock::{elapsed, wall_clock};

/// Multiplier from seconds to wire units.
pub const SECONDS_TO_WIRE: f64 = 4_294_967_296.0;
/// Multiplier from wire units to seconds.
pub const WIRE_TO_SECONDS: f64 = 1.0 / 4_294_967_296.0;
/// Seconds between the wire epoch (1900) and the Unix epoch (1970).
pub const SECONDS_FROM_1900_TO_1970: u64 = 2_208_988_800;

/// Seconds as wire units, without any offset.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn seconds_to_wire(seconds: f64) -> u64 {
    (seconds * SECONDS_TO_WIRE).round() as i64 as u64
}

/// Wall-clock reading (time since the Unix epoch) as wire time.
#[must_use]
pub fn wall_time_to_wire(since_unix: Duration) -> u64 {
    let seconds = since_unix.as_secs().wrapping_add(SECONDS_FROM_1900_TO_1970);
    let fraction = ((u64::from(since_unix.subsec_nanos()) << 32) + 500_000_000) / 1_000_000_000;
    (seconds << 32).wrapping_add(fraction)
}

/// Offset between elapsed time and wire time.
#[derive(Debug, Default)]
pub struct WireClock {
    offset: AtomicU64,
}

impl WireClock {
    /// Offset of zero; call [`WireClock::resync`] before trusting absolute values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offset: AtomicU64::new(0),
        }
    }

    /// Current offset in wire units.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset.load(Ordering::Acquire)
    }

    /// Elapsed seconds as wire time.
    #[must_use]
    pub fn elapsed_to_wire(&self, seconds: f64) -> u64 {
        seconds_to_wire(seconds).wrapping_add(self.offset())
    }

    /// Wire time as elapsed seconds.
    #[must_use]
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    pub fn wire_to_elapsed(&self, wire: u64) -> f64 {
        (wire.wrapping_sub(self.offset()) as i64) as f64 * WIRE_TO_SECONDS
    }

    /// Physical now as wire time.
    #[must_use]
    pub fn now_wire(&self) -> u64 {
        self.elapsed_to_wire(elapsed())
    }

    /// Re-measure the offset from `samples` readings, keeping the one whose
    /// monotonic bracket around the wall-clock read was tightest.
    #[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
    pub fn resync(&self, samples: usize) -> u64 {
        let mut best_gap = f64::INFINITY;
        let mut best = (elapsed(), wall_clock());
        for _ in 0..samples.max(1) {
            let before = elapsed();
            let wall = wall_clock();
            let after = elapsed();
            let gap = after - before;
            if gap < best_gap {
                best_gap = gap;
                best = (before + gap / 2.0, wall);
            }
        }
        let (midpoint, wall) = best;
        let offset = wall_time_to_wire(wall).wrapping_sub(seconds_to_wire(midpoint));
        let previous = self.offset.swap(offset, Ordering::AcqRel);
        if previous != 0 {
            let drift = (offset.wrapping_sub(previous) as i64) as f64 * WIRE_TO_SECONDS;
            debug!(offset, drift, gap = best_gap, "wire offset resynchronized");
        }
        offset
    }
}

/// Background thread re-measuring a [`WireClock`] offset at a fixed interval.
pub(crate) struct ResyncThread {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl ResyncThread {
    pub fn spawn(
        name: &str,
        wire: Arc<WireClock>,
        interval: Duration,
        samples: usize,
    ) -> std::io::Result<Self> {
        let (stop, stop_rx) = bounded::<()>(1);
        let thread_name = format!("{name}-resync");
        let handle = thread::Builder::new().name(thread_name).spawn(move || {
            debug!(interval_secs = interval.as_secs_f64(), "resync thread started");
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        wire.resync(samples);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            debug!("resync thread exited");
        })?;
        Ok(Self { stop, handle })
    }

    /// Tell the thread to exit and join it.
    pub fn shutdown(self) {
        let Self { stop, handle } = self;
        drop(stop);
        if handle.join().is_err() {
            warn!("resync thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_is_bit_exact() {
        assert_eq!(seconds_to_wire(1.0), 1 << 32);
        assert_eq!(seconds_to_wire(1.5), 0x1_8000_0000);
        assert_eq!(seconds_to_wire(0.25), 0x4000_0000);
        assert_eq!(wall_time_to_wire(Duration::ZERO), SECONDS_FROM_1900_TO_1970 << 32);
        assert_eq!(
            wall_time_to_wire(Duration::from_millis(500)),
            (SECONDS_FROM_1900_TO_1970 << 32) + 0x8000_0000
        );
    }

    #[test]
    fn round_trip_within_a_microsecond() {
        let wire = WireClock::new();
        wire.resync(4);
        let mut t = 0.0;
        while t < 100_000.0 {
            let back = wire.wire_to_elapsed(wire.elapsed_to_wire(t));
            assert!((back - t).abs() < 1e-6, "t = {t}, back = {back}");
            t = t * 1.7 + 0.013;
        }
    }

    #[test]
    fn resync_maps_elapsed_onto_wall_clock() {
        let wire = WireClock::new();
        wire.resync(8);
        let expected = wall_time_to_wire(wall_clock());
        let actual = wire.now_wire();
        let diff = (actual.wrapping_sub(expected) as i64).unsigned_abs();
        // Within 50 ms.
        assert!(diff < seconds_to_wire(0.05), "diff = {diff}");
    }

    #[test]
    fn resync_thread_stops_promptly() {
        let wire = Arc::new(WireClock::new());
        let thread = ResyncThread::spawn("test", wire, Duration::from_secs(3600), 2).unwrap();
        thread.shutdown();
    }
}

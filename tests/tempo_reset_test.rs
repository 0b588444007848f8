//! Global reset of every live tempo clock.
//!
//! Kept in its own test binary: a reset reaches every tempo clock in the
//! process, so it must not race other tests' clocks.

use std::thread;
use std::time::{Duration, Instant};

use synth_clock::{LogicalClock, Schedulable, TempoClock, TempoClockConfig};

#[test]
fn reset_all_clears_everything_and_stops_non_permanent_clocks() {
    let transient = TempoClock::new(1.0).unwrap();
    let permanent = TempoClock::with_config(&TempoClockConfig {
        name: "keeper".into(),
        permanent: true,
        ..TempoClockConfig::default()
    })
    .unwrap();
    for clock in [&transient, &permanent] {
        clock
            .schedule(100.0, Schedulable::callback(|_, _, _| Ok(None)))
            .unwrap();
        assert_eq!(clock.queue_len(), 1);
    }

    TempoClock::reset_all();

    assert_eq!(permanent.queue_len(), 0);
    assert_eq!(transient.queue_len(), 0);

    let deadline = Instant::now() + Duration::from_secs(5);
    while transient.is_running() {
        assert!(Instant::now() < deadline, "transient clock did not stop");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(permanent.is_running());

    let live: Vec<_> = TempoClock::all().iter().map(LogicalClock::id).collect();
    assert!(live.contains(&permanent.id()));
    assert!(!live.contains(&transient.id()));

    // Demoting the clock lets the next reset stop it too.
    permanent.set_permanent(false);
    TempoClock::reset_all();
    let deadline = Instant::now() + Duration::from_secs(5);
    while permanent.is_running() {
        assert!(Instant::now() < deadline, "demoted clock did not stop");
        thread::sleep(Duration::from_millis(5));
    }
}

//! Tests for utility functions

use std::time::Duration;

use synth_clock::core::wire::{
    seconds_to_wire, wall_time_to_wire, WireClock, SECONDS_FROM_1900_TO_1970, WIRE_TO_SECONDS,
};
use synth_clock::util::{elapsed, init_tracing, process_origin, seconds_until, wall_clock};

#[test]
fn test_elapsed_tracks_process_origin() {
    let origin = process_origin();
    let a = elapsed();
    std::thread::sleep(Duration::from_millis(5));
    let b = elapsed();
    assert!(b - a >= 0.004);
    assert!((origin.elapsed().as_secs_f64() - elapsed()).abs() < 0.01);
}

#[test]
fn test_seconds_until() {
    assert!(seconds_until(elapsed() + 10.0) > 9.0);
    assert!(seconds_until(0.0).abs() < f64::EPSILON);
}

#[test]
fn test_wire_constants() {
    assert_eq!(seconds_to_wire(2.0), 2 << 32);
    assert!((WIRE_TO_SECONDS * 4_294_967_296.0 - 1.0).abs() < f64::EPSILON);
    // 1970-01-01 in wire time.
    assert_eq!(wall_time_to_wire(Duration::ZERO) >> 32, SECONDS_FROM_1900_TO_1970);
}

#[test]
fn test_wire_clock_follows_wall_clock() {
    let wire = WireClock::new();
    assert_eq!(wire.offset(), 0);
    wire.resync(8);
    let expected = wall_time_to_wire(wall_clock()) >> 32;
    let actual = wire.now_wire() >> 32;
    assert!(actual.abs_diff(expected) <= 1);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
}

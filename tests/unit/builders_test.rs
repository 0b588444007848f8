//! Tests for builder modules

use synth_clock::builders::build_clocks;
use synth_clock::config::{ClockConfig, TempoClockConfig};
use synth_clock::core::{ClockError, LogicalClock};

#[test]
fn test_build_clocks_from_defaults() {
    let mut cfg = ClockConfig::default();
    cfg.tempo = TempoClockConfig {
        name: "built".into(),
        tempo: 3.0,
        ..TempoClockConfig::default()
    };
    let set = build_clocks(&cfg).unwrap();

    assert!(set.system.is_running());
    assert!(set.tempo.is_running());
    assert!(set.app.is_running());
    assert_eq!(set.system.name(), "system");
    assert_eq!(set.tempo.name(), "built");
    assert_eq!(set.app.name(), "app");
    assert!((set.tempo.tempo().unwrap() - 3.0).abs() < f64::EPSILON);

    set.stop_all();
    assert!(!set.system.is_running());
    assert!(!set.app.is_running());
}

#[test]
fn test_build_clocks_rejects_invalid_config() {
    let mut cfg = ClockConfig::default();
    cfg.system.max_queue_depth = 0;
    match build_clocks(&cfg) {
        Err(ClockError::InvalidConfig(msg)) => assert!(msg.contains("system clock invalid")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("invalid config accepted"),
    }
}

//! Tests for configuration validation

use synth_clock::config::{
    AppClockConfig, ClockConfig, DriveMode, SystemClockConfig, TempoClockConfig, CONFIG_ENV_VAR,
};

#[test]
fn test_defaults_are_valid() {
    let cfg = ClockConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.system.name, "system");
    assert_eq!(cfg.system.resync_samples, 8);
    assert!((cfg.system.resync_interval_secs - 20.0).abs() < f64::EPSILON);
    assert!((cfg.tempo.tempo - 1.0).abs() < f64::EPSILON);
    assert!((cfg.tempo.beats_per_bar - 4.0).abs() < f64::EPSILON);
    assert!(!cfg.tempo.permanent);
    assert_eq!(cfg.app.mode, DriveMode::Recursive);
}

#[test]
fn test_system_config_invalid_queue_depth() {
    let invalid = SystemClockConfig {
        max_queue_depth: 0,
        ..SystemClockConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_system_config_invalid_resync_interval() {
    for interval in [0.0, -1.0, f64::NAN] {
        let invalid = SystemClockConfig {
            resync_interval_secs: interval,
            ..SystemClockConfig::default()
        };
        assert!(invalid.validate().is_err(), "interval {interval} accepted");
    }
}

#[test]
fn test_tempo_config_invalid_values() {
    let zero_tempo = TempoClockConfig {
        tempo: 0.0,
        ..TempoClockConfig::default()
    };
    assert!(zero_tempo.validate().is_err());

    let bad_meter = TempoClockConfig {
        beats_per_bar: -3.0,
        ..TempoClockConfig::default()
    };
    assert!(bad_meter.validate().is_err());

    let bad_beats = TempoClockConfig {
        beats: f64::INFINITY,
        ..TempoClockConfig::default()
    };
    assert!(bad_beats.validate().is_err());
}

#[test]
fn test_app_config_invalid_queue_depth() {
    let invalid = AppClockConfig {
        max_queue_depth: 0,
        ..AppClockConfig::default()
    };
    assert!(invalid.validate().is_err());
}

#[test]
fn test_from_json_fills_missing_fields() {
    let json = r#"{
        "tempo": { "tempo": 2.5, "permanent": true },
        "app": { "mode": "non_recursive" }
    }"#;
    let cfg = ClockConfig::from_json_str(json).unwrap();
    assert!((cfg.tempo.tempo - 2.5).abs() < f64::EPSILON);
    assert!(cfg.tempo.permanent);
    assert_eq!(cfg.tempo.name, "tempo");
    assert_eq!(cfg.app.mode, DriveMode::NonRecursive);
    assert_eq!(cfg.system, SystemClockConfig::default());
}

#[test]
fn test_from_json_reports_section() {
    let err = ClockConfig::from_json_str(r#"{ "tempo": { "tempo": -1.0 } }"#).unwrap_err();
    assert!(err.contains("tempo clock invalid"), "{err}");

    let err = ClockConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"), "{err}");
}

#[test]
fn test_config_round_trips_through_json() {
    let cfg = ClockConfig {
        app: AppClockConfig {
            name: "host".into(),
            mode: DriveMode::NonRecursive,
            max_queue_depth: 16,
        },
        ..ClockConfig::default()
    };
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(json.contains("\"non_recursive\""));
    assert_eq!(ClockConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_from_env_reads_json() {
    std::env::set_var(CONFIG_ENV_VAR, r#"{ "system": { "resync_samples": 3 } }"#);
    let cfg = ClockConfig::from_env().unwrap();
    std::env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(cfg.system.resync_samples, 3);
}

//! Tests for error types

use std::io;

use synth_clock::core::{ClockError, TaskError};

#[test]
fn test_not_running_error() {
    let err = ClockError::NotRunning("tempo".to_string());
    assert_eq!(format!("{err}"), "clock `tempo` is not running");
}

#[test]
fn test_queue_full_error() {
    let err = ClockError::QueueFull("max depth 4 reached".to_string());
    assert_eq!(format!("{err}"), "queue full: max depth 4 reached");
}

#[test]
fn test_invalid_tempo_error() {
    let err = ClockError::InvalidTempo(0.0);
    assert_eq!(format!("{err}"), "invalid tempo 0: must be finite and greater than 0");
}

#[test]
fn test_time_ahead_error() {
    let err = ClockError::TimeAhead {
        requested: 10.0,
        elapsed: 2.5,
    };
    assert_eq!(
        format!("{err}"),
        "logical time 10 is ahead of physical elapsed time 2.5"
    );
}

#[test]
fn test_spawn_error_from_io() {
    let err: ClockError = io::Error::other("no threads").into();
    assert!(matches!(err, ClockError::Spawn(_)));
    assert!(format!("{err}").contains("no threads"));
}

#[test]
fn test_task_error_is_transparent() {
    let err: ClockError = TaskError::Finished(7).into();
    assert_eq!(format!("{err}"), "task 7 has already finished");
}

#[test]
fn test_fault_classification() {
    let fault = TaskError::Fault {
        id: 1,
        source: anyhow::anyhow!("bad input"),
    };
    assert!(fault.is_fault());
    assert_eq!(format!("{fault}"), "task 1 faulted: bad input");

    let panicked = TaskError::Panicked {
        id: 2,
        message: "oops".into(),
    };
    assert!(panicked.is_fault());

    assert!(!TaskError::AlreadyRunning(3).is_fault());
    assert!(!TaskError::Finished(4).is_fault());
}

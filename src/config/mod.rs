//! Configuration models for clocks.

pub mod clock;

pub use clock::{
    AppClockConfig, ClockConfig, DriveMode, SystemClockConfig, TempoClockConfig, CONFIG_ENV_VAR,
};

//! Builders to construct clocks from configuration.

pub mod clock_builder;

pub use clock_builder::{build_clocks, ClockSet};

//! Shared utilities: physical time sources and telemetry setup.

pub mod clock;
pub mod telemetry;

pub use clock::*;
pub use telemetry::*;

//! Runtime adapters.

#[cfg(feature = "tokio-runtime")]
pub mod app_driver;

#[cfg(feature = "tokio-runtime")]
pub use app_driver::AppClockDriver;

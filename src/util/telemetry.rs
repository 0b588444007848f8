//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for clock threads and task faults. Hosts can install
/// their own subscriber; this helper installs a default env-filtered
/// subscriber (`RUST_LOG=synth_clock=debug`) if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}

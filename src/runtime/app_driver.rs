//! Drive an [`AppClock`] from a tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{AppClock, LogicalClock};

/// Sleep used when the queue is empty; a wake cuts it short.
const IDLE_PARK: Duration = Duration::from_secs(3600);

/// Background task that ticks an [`AppClock`] whenever its next entry is due.
///
/// The clock's wake hook is pointed at the driver, so scheduling an earlier
/// entry re-arms the sleep at once. Entries run on a runtime worker thread.
pub struct AppClockDriver {
    clock: AppClock,
    stop: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl AppClockDriver {
    /// Start driving `clock` on the current tokio runtime. The first tick
    /// happens immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn spawn(clock: AppClock) -> Self {
        let wake = Arc::new(Notify::new());
        let stop = Arc::new(Notify::new());
        clock.set_wake_hook({
            let wake = Arc::clone(&wake);
            move || wake.notify_one()
        });
        let handle = tokio::spawn(drive(clock.clone(), wake, Arc::clone(&stop)));
        info!(clock = %clock.name(), "app clock driver started");
        Self {
            clock,
            stop,
            handle,
        }
    }

    /// The driven clock.
    #[must_use]
    pub const fn clock(&self) -> &AppClock {
        &self.clock
    }

    /// Stop driving and wait for the loop to exit. The clock itself keeps
    /// running and can be advanced by hand.
    pub async fn shutdown(self) {
        self.clock.clear_wake_hook();
        self.stop.notify_one();
        if let Err(err) = self.handle.await {
            warn!(clock = %self.clock.name(), error = %err, "app clock driver task failed");
        }
        info!(clock = %self.clock.name(), "app clock driver stopped");
    }
}

async fn drive(clock: AppClock, wake: Arc<Notify>, stop: Arc<Notify>) {
    loop {
        clock.tick();
        if !clock.is_running() {
            debug!(clock = %clock.name(), "clock stopped; driver exiting");
            break;
        }
        let park = clock.next_wait().unwrap_or(IDLE_PARK);
        tokio::select! {
            () = tokio::time::sleep(park) => {}
            () = wake.notified() => {}
            () = stop.notified() => break,
        }
    }
}

//! Periodic listing refresh.

use std::sync::Arc;

use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::Inner;
use crate::lock;

/// Start (or restart) the refresh timer.
///
/// The task holds only a weak reference, so dropping the last session handle
/// ends it even if the abort in `Drop` is missed. The first tick fires one
/// full period after start; `connect()` performs its own initial refresh.
pub(super) fn start(inner: &Arc<Inner>) {
    let period = inner.poll_interval;
    let session = Arc::downgrade(inner);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        // A slow refresh pushes the next tick back instead of bursting.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(inner) = session.upgrade() else {
                break;
            };
            if let Err(e) = inner.refresh().await {
                debug!(error = %e, "scheduled refresh failed, waiting for next tick");
            }
        }
    });

    if let Some(previous) = lock(&inner.poller).replace(task) {
        previous.abort();
    }
    debug!(period_ms = period.as_millis() as u64, "listing poller started");
}

//! Background task that watches for schedule period boundaries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::Kiosk;

/// Sample the schedule clock every `interval` until `shutdown` fires.
pub fn spawn_period_monitor(
    kiosk: Arc<Kiosk>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "period monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(change) = kiosk.check_period_boundary() {
                        debug!(from = change.from.label, to = change.to.label, "boundary published");
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("period monitor shutting down");
                    break;
                }
            }
        }
    })
}

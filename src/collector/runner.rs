use log::info;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior, interval};

use super::Collector;

/// Drives collection cycles on a fixed interval until shutdown.
///
/// This loop:
/// - Runs one cycle per tick (the first tick fires immediately)
/// - Skips ticks missed while a slow cycle was running
/// - Stops once `shutdown` flips to `true` or its sender is dropped
///
/// GUARANTEES:
/// - Cycles never overlap; each one is awaited to completion
/// - A cycle in flight when shutdown arrives finishes normally
///   (every upstream call is timeout-bounded), so counters are
///   never left half-updated
/// - No new cycle starts after shutdown
///
pub async fn run_scheduler(
    collector: Arc<Collector>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {}
        }

        // Either branch may have won the race against a shutdown
        if *shutdown.borrow() || shutdown.has_changed().is_err() {
            break;
        }

        let started = Instant::now();
        if let Some(summary) = collector.collect().await {
            info!(
                "Collection cycle done in {:?}: vhosts={} up={} down={}",
                started.elapsed(),
                summary.vhosts,
                summary.streams_up,
                summary.streams_down,
            );
        }
    }

    info!("Collection scheduler stopped");
}

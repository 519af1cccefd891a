//! Periodic snapshot polling.
//!
//! Each source gets its own task. A tick polls the source and broadcasts the
//! result through the hub; failures are logged and the tick is skipped. Every
//! poller stops when the shutdown token is cancelled.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blitz_core::SnapshotSource;
use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::POLL_FAILURES_TOTAL;
use crate::websocket::broadcast::BroadcastHub;

/// Poller configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollerError {
    /// The interval was zero.
    #[error("poll interval must be greater than zero")]
    ZeroInterval,
}

/// Run `task` immediately and then every `interval` until `stop` is cancelled.
///
/// A tick that is already running when `stop` fires completes; no new tick
/// starts afterwards. Missed ticks are skipped. Returns the number of ticks run.
pub async fn run_poller<F, Fut>(
    interval: Duration,
    stop: CancellationToken,
    mut task: F,
) -> Result<u64, PollerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    if interval.is_zero() {
        return Err(PollerError::ZeroInterval);
    }

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut ticks = 0;
    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                task().await;
                ticks += 1;
            }
        }
    }
    Ok(ticks)
}

/// Poll `source` once and broadcast the snapshot.
///
/// Returns whether the poll succeeded.
pub async fn poll_once(source: &dyn SnapshotSource, hub: &BroadcastHub) -> bool {
    let kind = source.kind().as_str();
    match source.poll().await {
        Ok(snapshot) => {
            let delivered = hub.broadcast(snapshot.to_message()).await;
            debug!(source = kind, delivered, "snapshot broadcast");
            true
        }
        Err(e) => {
            counter!(POLL_FAILURES_TOTAL, "source" => kind).increment(1);
            warn!(source = kind, error = %e, "poll failed, skipping tick");
            false
        }
    }
}

/// Spawn a task polling `source` every `interval` and broadcasting to `hub`.
///
/// The interval is validated before anything is spawned.
pub fn spawn_snapshot_poller(
    source: Arc<dyn SnapshotSource>,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    stop: CancellationToken,
) -> Result<JoinHandle<()>, PollerError> {
    if interval.is_zero() {
        return Err(PollerError::ZeroInterval);
    }
    let kind = source.kind().as_str();
    info!(source = kind, ?interval, "starting poller");

    Ok(tokio::spawn(async move {
        let result = run_poller(interval, stop, || {
            let source = Arc::clone(&source);
            let hub = Arc::clone(&hub);
            async move {
                let _ = poll_once(source.as_ref(), &hub).await;
            }
        })
        .await;
        match result {
            Ok(ticks) => info!(source = kind, ticks, "poller stopped"),
            Err(e) => warn!(source = kind, error = %e, "poller did not start"),
        }
    }))
}

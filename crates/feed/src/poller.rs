use std::sync::Arc;
use std::time::Duration;

use alphaark_core::PriceSource;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::manager::BroadcastHandle;

/// Control for a running poll task.
pub struct PollerHandle {
    stop: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Ask the poller to stop. Best effort: ignored if a stop is already pending.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "Price poller task failed");
        }
    }
}

/// Fetch a snapshot every `every` and hand it to the broadcast manager.
/// Fetch errors skip the tick; a full broadcast channel drops it.
pub fn spawn_poller(source: Arc<dyn PriceSource>, feed: BroadcastHandle, every: Duration) -> PollerHandle {
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = every.as_secs(), "Price poller started");

        loop {
            tokio::select! {
                _ = stop_rx.recv() => break,
                _ = ticker.tick() => {
                    let snapshot = match source.latest().await {
                        Ok(snapshot) => snapshot,
                        Err(e) => {
                            warn!(error = %e, "Price poll failed");
                            continue;
                        }
                    };
                    match serde_json::to_string(&snapshot) {
                        Ok(payload) => {
                            if !feed.try_broadcast(payload) {
                                debug!(symbol = %snapshot.symbol, "Price tick dropped");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to serialize price snapshot"),
                    }
                }
            }
        }
        info!("Price poller stopped");
    });

    PollerHandle { stop: stop_tx, task }
}

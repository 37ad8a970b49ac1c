//! Coarse fallback timer
//!
//! Periodically signals every watched tree so that commits the filesystem
//! watcher missed (overflow, network filesystems, sleep/resume) are still
//! picked up.

use crate::ChangeSignal;
use annexstat_core::TreeId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic change signal for every tree
pub struct FallbackTimer<F> {
    /// Signal interval (default: 5 minutes)
    interval: Duration,

    /// Current tree set, read at each tick
    trees: F,

    signal_tx: mpsc::Sender<ChangeSignal>,
}

impl<F> FallbackTimer<F>
where
    F: Fn() -> Vec<TreeId> + Send + Sync + 'static,
{
    pub fn new(interval: Duration, trees: F, signal_tx: mpsc::Sender<ChangeSignal>) -> Self {
        Self {
            interval,
            trees,
            signal_tx,
        }
    }

    /// Run until the signal receiver is dropped
    pub async fn run(self) {
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting fallback timer (interval: {:?})", self.interval);

        // The first tick completes immediately; startup is handled elsewhere
        timer.tick().await;

        loop {
            timer.tick().await;

            let trees = (self.trees)();
            debug!("Fallback timer signalling {} trees", trees.len());

            for tree in trees {
                if self.signal_tx.send(ChangeSignal { tree }).await.is_err() {
                    debug!("Signal receiver closed; stopping fallback timer");
                    return;
                }
            }
        }
    }
}

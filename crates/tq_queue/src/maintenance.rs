//! Background upkeep of a running queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tq_utils::server_shutdown::ShutdownReceiver;

use crate::server::QueueServer;

pub struct QueueMaintenance;

impl QueueMaintenance {
    /// Reclaims stuck buckets every `interval` until shutdown is requested.
    /// The first check runs right away.
    pub fn spawn(
        server: Arc<QueueServer>,
        interval: Duration,
        mut shutdown: ShutdownReceiver,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        let stuck = server.reenqueue_stuck_buckets();
                        if !stuck.is_empty() {
                            tracing::info!(count = stuck.len(), "reclaimed stuck buckets");
                        }
                    }
                    _ = shutdown.recv_shutdown_immediately() => {
                        tracing::debug!("stopping queue maintenance");
                        break;
                    }
                }
            }
        })
    }
}

//! Periodic eviction of idle sessions.
//!
//! # Responsibilities
//! - Sweep every cluster's session table on a fixed interval
//! - Stop on an explicit signal, or once the balancer is gone
//!
//! # Design Decisions
//! - Holds a `Weak<Balancer>` so the task never keeps the registry alive
//! - Each pass locks one session shard at a time; request-path lookups interleave freely

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::Shutdown;
use crate::load_balancer::balancer::Balancer;
use crate::observability::metrics;

/// Time between two cleanup passes (15 seconds).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(15);

/// Background task evicting idle sessions.
pub struct SessionCleanupTask {
    balancer: Weak<Balancer>,
    interval: Duration,
}

/// Handle to a spawned [`SessionCleanupTask`].
#[derive(Debug)]
pub struct CleanupHandle {
    shutdown: Shutdown,
    join: JoinHandle<()>,
}

impl CleanupHandle {
    /// Signal the task to exit after its current pass.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

impl SessionCleanupTask {
    pub fn new(balancer: Weak<Balancer>, interval: Duration) -> Self {
        Self { balancer, interval }
    }

    /// Spawn the task on the current Tokio runtime.
    pub fn spawn(self) -> CleanupHandle {
        let shutdown = Shutdown::new();
        let rx = shutdown.subscribe();
        let join = tokio::spawn(self.run(rx));
        CleanupHandle { shutdown, join }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Session cleanup starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if !self.sweep() {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Session cleanup received stop signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One cleanup pass. Returns false once the balancer has been dropped.
    fn sweep(&self) -> bool {
        let Some(balancer) = self.balancer.upgrade() else {
            tracing::debug!("Balancer dropped, session cleanup exiting");
            return false;
        };
        let evicted = balancer.evict_idle_sessions();
        if evicted > 0 {
            tracing::info!(balancer = %balancer.name(), evicted, "Session cleanup pass");
            metrics::record_sessions_evicted(evicted);
        }
        true
    }
}

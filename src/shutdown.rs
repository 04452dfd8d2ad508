use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::coordinator::Coordinator;
use crate::observability::flow_metrics;
use crate::telemetry::shutdown_telemetry;

/// Graceful shutdown coordinator for fieldflow
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Receiver that flips to `true` once shutdown starts.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }

    pub fn trigger(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.sender.borrow()
    }

    /// Wait for ctrl-c, then flip the shutdown flag.
    pub async fn wait_for_signal(&self) -> Result<()> {
        info!("Shutdown coordinator ready - will shutdown gracefully on ctrl-c");
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        self.trigger();
        Ok(())
    }

    /// Stop timers and write final counters. `router_done` is the router's
    /// drain, bounded so a stuck collaborator cannot hold the process.
    pub async fn shutdown_all_services<F>(coordinator: &Coordinator, router_done: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        info!("Initiating graceful shutdown of all services...");

        if timeout(Duration::from_secs(30), router_done).await.is_err() {
            warn!("Timeout waiting for mailboxes to drain");
        }

        let aborted = coordinator.shutdown();
        info!(aborted, "Pending timeouts cancelled; sessions stay persisted");

        flow_metrics().log_stats();
        shutdown_telemetry();

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}

//! The Warden - background executor
//!
//! Runs long region batches off the request path:
//! - Orders are queued on a bounded channel and acknowledged at once,
//!   or refused when the queue is full
//! - Orders execute strictly one at a time, in arrival order
//! - Shutdown is queued behind pending orders, so awaiting the loop drains it

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{error, info};

use crate::bridge::Bridge;
use crate::error::{Error, Result};

/// Orders that may wait in the queue
const QUEUE_DEPTH: usize = 100;

/// Orders the Warden accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WardenOrder {
    /// Restart every app of a region, one after another
    RestartRegion { region: String, operator: String },
    /// Stop after finishing queued orders
    Shutdown,
}

/// Executes queued orders against the bridge
pub struct Warden {
    /// Channel to receive orders
    rx: mpsc::Receiver<WardenOrder>,
    /// Sender for queueing orders (cloneable)
    tx: mpsc::Sender<WardenOrder>,
    /// Shared controller
    bridge: Arc<Bridge>,
}

impl Warden {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Self { rx, tx, bridge }
    }

    pub fn sender(&self) -> mpsc::Sender<WardenOrder> {
        self.tx.clone()
    }

    /// Run the order loop
    ///
    /// This should be spawned as a tokio task
    pub async fn run(mut self) {
        info!("warden started");
        // Only handles keep the channel open from here on
        drop(self.tx);

        while let Some(order) = self.rx.recv().await {
            match order {
                WardenOrder::RestartRegion { region, operator } => {
                    info!(%region, %operator, "warden executing region restart");
                    match self.bridge.restart_region(&region, &operator).await {
                        Ok(outcomes) => info!(%region, apps = outcomes.len(), "region restart done"),
                        Err(e) => error!(%region, error = %e, "region restart failed"),
                    }
                }
                WardenOrder::Shutdown => {
                    info!("warden shutting down");
                    break;
                }
            }
        }

        info!("warden stopped");
    }

    /// Queue a shutdown behind pending orders
    pub async fn request_shutdown(sender: &mpsc::Sender<WardenOrder>) {
        let _ = sender.send(WardenOrder::Shutdown).await;
    }
}

/// Handle for queueing orders
#[derive(Clone)]
pub struct WardenHandle {
    sender: mpsc::Sender<WardenOrder>,
}

impl WardenHandle {
    pub fn new(warden: &Warden) -> Self {
        Self {
            sender: warden.sender(),
        }
    }

    /// Queue a region restart and return without waiting for it
    ///
    /// Fails with `WardenBusy` instead of waiting when the queue is full.
    pub fn submit_region_restart(&self, region: &str, operator: &str) -> Result<()> {
        self.sender
            .try_send(WardenOrder::RestartRegion {
                region: region.to_string(),
                operator: operator.to_string(),
            })
            .map_err(|e| match e {
                TrySendError::Full(_) => Error::WardenBusy,
                TrySendError::Closed(_) => Error::WardenClosed,
            })
    }

    pub async fn shutdown(&self) {
        Warden::request_shutdown(&self.sender).await;
    }
}

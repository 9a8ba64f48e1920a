//! Shutdown coordination for the bridge.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::channel::shm::SharedChannel;
use crate::channel::signal::NamedSemaphore;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The named OS objects a bridge process owns.
///
/// [`Resources::release`] unlinks both names. It runs at most once; `Drop`
/// calls it as a fallback. Open handles are untouched: the mapping is unmapped
/// and the semaphore closed when the last `Arc` to each goes away.
#[derive(Debug)]
pub struct Resources {
    channel_name: String,
    signal_name: String,
    released: AtomicBool,
}

impl Resources {
    pub fn new(channel_name: &str, signal_name: &str) -> Self {
        Self {
            channel_name: channel_name.to_string(),
            signal_name: signal_name.to_string(),
            released: AtomicBool::new(false),
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Release everything. Returns `false` if a previous call already did.
    ///
    /// Failures are logged and do not stop the remaining steps.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        match NamedSemaphore::remove(&self.signal_name) {
            Ok(true) => tracing::debug!(name = %self.signal_name, "Request signal removed"),
            Ok(false) => tracing::debug!(name = %self.signal_name, "Request signal already gone"),
            Err(e) => tracing::error!(error = %e, "Failed to remove request signal"),
        }

        match SharedChannel::remove(&self.channel_name) {
            Ok(true) => tracing::debug!(name = %self.channel_name, "Shared channel removed"),
            Ok(false) => tracing::debug!(name = %self.channel_name, "Shared channel already gone"),
            Err(e) => tracing::error!(error = %e, "Failed to remove shared channel"),
        }

        tracing::info!("Shared resources released");
        true
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.release();
    }
}

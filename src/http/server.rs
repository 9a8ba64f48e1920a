//! Listener/Dispatcher.
//!
//! # Responsibilities
//! - Accept connections under the listener's admission limit
//! - Assign each one the next request id
//! - Spawn a task per connection and never wait on it
//! - Stop accepting when shutdown is signaled
//!
//! # Design Decisions
//! - Accept errors are logged and counted, never fatal
//! - State shared with tasks and the admin API lives in one `Arc<BridgeState>`

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;

use crate::channel::correlator::ResponseCorrelator;
use crate::channel::shm::SharedChannel;
use crate::channel::signal::RequestNotifier;
use crate::channel::submitter::RequestSubmitter;
use crate::config::{BridgeConfig, OverflowPolicy};
use crate::net::connection::{
    ConnectionContext, ConnectionHandler, ConnectionTracker, RequestIdGenerator,
};
use crate::net::listener::{Listener, ListenerError};
use crate::observability::metrics;

/// Pause after a failed accept so a persistent error (EMFILE) cannot spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// State shared by the dispatcher, connection tasks and the admin API.
pub struct BridgeState {
    pub handler: ConnectionHandler,
    pub channel: Arc<SharedChannel>,
    pub tls: Option<TlsAcceptor>,
    pub ids: RequestIdGenerator,
    pub tracker: ConnectionTracker,
    pub started: Instant,
    pub num_workers: usize,
    pub overflow: OverflowPolicy,
}

impl BridgeState {
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }
}

/// The client-facing server.
#[derive(Clone)]
pub struct BridgeServer {
    state: Arc<BridgeState>,
}

impl BridgeServer {
    pub fn new(
        config: &BridgeConfig,
        channel: Arc<SharedChannel>,
        notifier: Arc<dyn RequestNotifier>,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        let submitter =
            RequestSubmitter::new(channel.clone(), notifier, config.channel.overflow);
        let correlator = Arc::new(ResponseCorrelator::new(
            channel.clone(),
            config.channel.poll_interval(),
        ));
        let handler = ConnectionHandler::new(
            submitter,
            correlator,
            config.server.read_timeout(),
            config.server.response_timeout(),
        );

        Self {
            state: Arc::new(BridgeState {
                handler,
                channel,
                tls,
                ids: RequestIdGenerator::new(),
                tracker: ConnectionTracker::new(),
                started: Instant::now(),
                num_workers: config.worker.num_workers,
                overflow: config.channel.overflow,
            }),
        }
    }

    pub fn state(&self) -> Arc<BridgeState> {
        Arc::clone(&self.state)
    }

    /// Accept until `shutdown` fires. In-flight connections keep running.
    pub async fn run(
        &self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                address = %addr,
                tls = self.state.tls_enabled(),
                "Bridge accepting connections"
            );
        }

        loop {
            let accepted = tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Dispatcher stopping");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            let (stream, peer, permit) = match accepted {
                Ok(accepted) => accepted,
                Err(ListenerError::Closed) => return Err(ListenerError::Closed),
                Err(e) => {
                    tracing::error!(error = %e, "Accept failed");
                    metrics::record_accept_error();
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    continue;
                }
            };

            let request_id = self.state.ids.next_id();
            let guard = self.state.tracker.track();
            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                let mut ctx = ConnectionContext::new(request_id, peer);
                state
                    .handler
                    .serve(stream, state.tls.as_ref(), &mut ctx)
                    .await;
            });
        }
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the TLS context from PEM material
//! - Create the shared channel and the request signal
//! - Bind the client listener and (optionally) the admin API
//! - Run until a termination signal, then tear down in order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::admin::{serve_admin, setup_admin_router};
use crate::channel::shm::{ChannelError, SharedChannel};
use crate::channel::signal::{NamedSemaphore, SignalError};
use crate::config::BridgeConfig;
use crate::http::server::BridgeServer;
use crate::lifecycle::shutdown::{Resources, Shutdown};
use crate::lifecycle::signals::termination_signal;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::{load_tls_acceptor, TlsError};

/// How long shutdown waits for in-flight connections.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("shared channel setup failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("request signal setup failed: {0}")]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("admin API bind failed on {address}: {source}")]
    Admin {
        address: String,
        source: std::io::Error,
    },
}

/// Everything a running bridge owns.
pub struct Runtime {
    pub server: BridgeServer,
    pub listener: Listener,
    pub resources: Arc<Resources>,
    pub shutdown: Shutdown,
    dispatcher_stop: broadcast::Receiver<()>,
    admin: Option<JoinHandle<()>>,
}

/// Bring the bridge up to the point where it is ready to accept.
pub async fn start(config: &BridgeConfig) -> Result<Runtime, StartupError> {
    let tls = if config.server.tls {
        Some(load_tls_acceptor(
            Path::new(&config.server.cert_file),
            Path::new(&config.server.key_file),
        )?)
    } else {
        tracing::warn!("TLS disabled, serving plain HTTP");
        None
    };

    let channel_name = &config.channel.name;
    let signal_name = &config.channel.request_signal;
    if config.channel.reset_on_start {
        if SharedChannel::remove(channel_name)? {
            tracing::info!(name = %channel_name, "Removed stale shared channel");
        }
        if NamedSemaphore::remove(signal_name)? {
            tracing::info!(name = %signal_name, "Removed stale request signal");
        }
    }

    let channel = Arc::new(SharedChannel::create_or_attach(channel_name)?);
    let semaphore = Arc::new(NamedSemaphore::create(signal_name)?);
    let resources = Arc::new(Resources::new(channel_name, signal_name));

    let listener = Listener::bind(
        &config.server.bind_address(),
        config.server.max_connections,
    )
    .await?;

    let server = BridgeServer::new(config, channel, semaphore, tls);
    let shutdown = Shutdown::new();
    // Subscribed here so a trigger sent before the dispatcher runs is not lost.
    let dispatcher_stop = shutdown.subscribe();

    let admin = if config.admin.enabled {
        let address = &config.admin.bind_address;
        let admin_listener = tokio::net::TcpListener::bind(address)
            .await
            .map_err(|source| StartupError::Admin {
                address: address.clone(),
                source,
            })?;
        let router = setup_admin_router(server.state(), &config.admin.api_key);
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = serve_admin(admin_listener, router, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    Ok(Runtime {
        server,
        listener,
        resources,
        shutdown,
        dispatcher_stop,
        admin,
    })
}

impl Runtime {
    /// Serve until SIGINT/SIGTERM, then stop accepting, drain briefly and
    /// release the shared resources.
    pub async fn run(self) -> Result<(), ListenerError> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            termination_signal().await;
            shutdown.trigger();
        });
        self.run_until_shutdown().await
    }

    /// Serve until [`Runtime::shutdown`] is triggered.
    pub async fn run_until_shutdown(self) -> Result<(), ListenerError> {
        let Runtime {
            server,
            listener,
            resources,
            shutdown,
            dispatcher_stop,
            admin,
        } = self;

        let result = server.run(listener, dispatcher_stop).await;
        // A dispatcher failure still has to bring the admin API down.
        shutdown.trigger();

        let state = server.state();
        if !state.tracker.wait_for_idle(DRAIN_TIMEOUT).await {
            tracing::warn!(
                active = state.tracker.active_count(),
                "Connections still open after drain timeout"
            );
        }
        if let Some(admin) = admin {
            let _ = admin.await;
        }

        resources.release();
        tracing::info!("Shutdown complete");
        result
    }
}

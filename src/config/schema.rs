//! Configuration schema definitions.
//!
//! Every section defaults independently, so an empty file (or no file at all)
//! yields a working server. Unknown keys are rejected at parse time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::layout::{DEFAULT_CHANNEL_NAME, DEFAULT_REQUEST_SIGNAL};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Client-facing listener (port, TLS, timeouts).
    pub server: ServerConfig,

    /// Shared channel names and behavior.
    pub channel: ChannelConfig,

    /// External worker hints.
    pub worker: WorkerConfig,

    /// Optional status API.
    pub admin: AdminConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Interface to bind (e.g., "0.0.0.0").
    pub bind_host: String,

    /// Terminate TLS on accepted connections.
    pub tls: bool,

    /// Path to certificate chain (PEM).
    pub cert_file: String,

    /// Path to private key (PEM).
    pub key_file: String,

    /// How long a connection waits for its worker response, in seconds.
    pub timeout_seconds: u64,

    /// Budget for reading the request (and the TLS handshake), in milliseconds.
    pub read_timeout_ms: u64,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_host: "0.0.0.0".to_string(),
            tls: true,
            cert_file: "cert.pem".to_string(),
            key_file: "key.pem".to_string(),
            timeout_seconds: 30,
            read_timeout_ms: 5000,
            max_connections: 1024,
        }
    }
}

/// What the submitter does when the worker has not drained the request ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Refuse the request; the client sees 503.
    #[default]
    Reject,
    /// Overwrite the oldest undrained entry (logged and counted). The worker
    /// reads the overwriting record twice; the second response is an orphan.
    Overwrite,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::Reject => write!(f, "reject"),
            OverflowPolicy::Overwrite => write!(f, "overwrite"),
        }
    }
}

/// Shared channel configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    /// POSIX shared-memory object name.
    pub name: String,

    /// POSIX named semaphore posted once per submitted request.
    pub request_signal: String,

    /// Response ring poll interval in milliseconds.
    pub poll_interval_ms: u64,

    pub overflow: OverflowPolicy,

    /// Remove stale objects of the same names before creating.
    pub reset_on_start: bool,
}

impl ChannelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL_NAME.to_string(),
            request_signal: DEFAULT_REQUEST_SIGNAL.to_string(),
            poll_interval_ms: 10,
            overflow: OverflowPolicy::Reject,
            reset_on_start: true,
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Worker concurrency hint. Reported by the admin API only.
    pub num_workers: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { num_workers: 4 }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AdminConfig {
    /// Serve the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

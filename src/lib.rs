//! Shared-memory HTTP bridge library.
//!
//! Terminates (optionally TLS) HTTP/1.x connections, hands each request to an
//! external worker through a pair of ring buffers in POSIX shared memory, and
//! writes the worker's response back to the client.

pub mod admin;
pub mod channel;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::BridgeConfig;
pub use http::BridgeServer;
pub use lifecycle::Shutdown;

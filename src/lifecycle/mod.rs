//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     TLS context → stale object cleanup → shared channel → request signal
//!     → bind listener → admin API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!     → unlink semaphore and channel names → Exit
//!     (handles close when their last owner drops)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then shared objects, then listeners
//! - Release runs at most once, with a `Drop` fallback
//! - Drain has a timeout: stragglers do not block exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Resources, Shutdown};
pub use startup::{start, Runtime, StartupError};

//! Logging and metrics.
//!
//! ```text
//! connection handler, submitter, correlator, dispatcher
//!     → logging.rs (tracing events carrying request_id, slot, cursor)
//!     → metrics.rs (request counts, ring depth, overwrites, orphans)
//! ```
//!
//! Logs go to stdout, pretty or JSON. Metrics are only exported when
//! `observability.metrics_enabled` is set; otherwise recording is a no-op.

pub mod logging;
pub mod metrics;

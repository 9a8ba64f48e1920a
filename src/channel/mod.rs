//! Shared-memory channel to the external worker.
//!
//! # Data Flow
//! ```text
//! Connection handler
//!     → submitter.rs (write RequestRecord into the request ring, post semaphore)
//!     → [external worker drains the ring, computes a response]
//!     → [worker pushes ResponseRecord into the response ring]
//!     → correlator.rs (owning waiter claims it by request id)
//!     → Connection handler
//! ```
//!
//! # Design Decisions
//! - layout.rs is the wire contract with the worker: `#[repr(C)]`, fixed sizes
//! - Each ring has its own process-local lock; no lock spans both rings
//! - The region is a POSIX shm object mapped with memmap2; the doorbell is a
//!   POSIX named semaphore

pub mod correlator;
pub mod layout;
pub mod ring;
pub mod shm;
pub mod signal;
pub mod submitter;
pub mod worker;

pub use correlator::{CorrelationError, ResponseCorrelator, ResponseTicket};
pub use layout::{RequestRecord, ResponseRecord, CHANNEL_SIZE};
pub use shm::{ChannelError, ChannelSnapshot, SharedChannel};
pub use signal::{LocalNotifier, NamedSemaphore, RequestNotifier, SignalError};
pub use submitter::{RequestSubmitter, SubmitError, Submission};
pub use worker::WorkerEndpoint;

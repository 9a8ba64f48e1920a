//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection permits)
//!     → tls.rs (optional TLS handshake)
//!     → connection.rs (read, submit, await response, reply)
//!
//! Connection States:
//!     Accepted → Handshaking → Reading → Submitted
//!     → AwaitingResponse → Replying → Closed
//! ```
//!
//! # Design Decisions
//! - One request per connection; the reply always carries `Connection: close`
//! - Each connection is tracked so shutdown can drain it

pub mod connection;
pub mod listener;
pub mod tls;

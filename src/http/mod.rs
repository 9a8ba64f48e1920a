//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (accept, assign request id, spawn)
//!     → parser.rs (request line + headers → RequestRecord)
//!     → [shared channel round trip to the worker]
//!     → response.rs (ResponseRecord → HTTP/1.1 reply)
//!     → Send to client
//! ```

pub mod parser;
pub mod response;
pub mod server;

pub use parser::{parse_into, ParseError};
pub use server::{BridgeServer, BridgeState};

//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! bridge.toml (optional)
//!     → loader.rs (parse & deserialize, defaults if absent)
//!     → validation.rs (semantic checks)
//!     → BridgeConfig (validated, immutable)
//!     → copied into the subsystems at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Unknown keys are an error, not silently ignored
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_or_default, parse_config, ConfigError};
pub use schema::{
    AdminConfig, BridgeConfig, ChannelConfig, LogFormat, ObservabilityConfig, OverflowPolicy,
    ServerConfig, WorkerConfig,
};
pub use validation::{validate_config, ValidationError};

//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, connection limit > 0)
//! - Check IPC object names before anything touches the OS
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BridgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::channel::shm::object_name;
use crate::config::schema::BridgeConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &BridgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let server = &config.server;
    if server.timeout_seconds == 0 {
        errors.push(ValidationError::new("server.timeout_seconds", "must be greater than 0"));
    }
    if server.read_timeout_ms == 0 {
        errors.push(ValidationError::new("server.read_timeout_ms", "must be greater than 0"));
    }
    if server.max_connections == 0 {
        errors.push(ValidationError::new("server.max_connections", "must be greater than 0"));
    }
    if server.tls {
        if server.cert_file.trim().is_empty() {
            errors.push(ValidationError::new("server.cert_file", "required when tls is enabled"));
        }
        if server.key_file.trim().is_empty() {
            errors.push(ValidationError::new("server.key_file", "required when tls is enabled"));
        }
    }

    let channel = &config.channel;
    if object_name(&channel.name).is_err() {
        errors.push(ValidationError::new(
            "channel.name",
            format!("{:?} must start with '/', contain no other '/', and be at most 255 bytes", channel.name),
        ));
    }
    if object_name(&channel.request_signal).is_err() {
        errors.push(ValidationError::new(
            "channel.request_signal",
            format!("{:?} must start with '/', contain no other '/', and be at most 255 bytes", channel.request_signal),
        ));
    }
    if channel.poll_interval_ms == 0 {
        errors.push(ValidationError::new("channel.poll_interval_ms", "must be greater than 0"));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when admin is enabled"));
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("{:?} is not one of {}", config.observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

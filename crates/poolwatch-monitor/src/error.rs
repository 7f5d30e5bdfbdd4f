//! Monitor error types.

use std::time::Duration;

use thiserror::Error;

/// Invalid startup configuration. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },

    #[error("{name} must be positive")]
    NonPositive { name: &'static str },

    #[error("{0} command is empty")]
    EmptyCommand(&'static str),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("invalid {field} address: {reason}")]
    Address { field: &'static str, reason: String },

    #[error("notifier setup failed: {0}")]
    Notifier(String),
}

/// A poll that produced no usable snapshot. The tick is skipped.
#[derive(Debug, Error)]
pub enum SampleError {
    #[error("failed to run {command}: {reason}")]
    Spawn { command: String, reason: String },

    #[error("sampling timed out after {0:?}")]
    Timeout(Duration),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("malformed sampler output: {0}")]
    Malformed(String),

    #[error("sampler reported no pools")]
    Empty,
}

/// A notification that could not be delivered. Logged, never fatal.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("message build error: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

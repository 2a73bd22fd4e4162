//! Error types for fleetd
//!
//! This module defines the error hierarchy for the fleet management daemon.
//! All errors are categorized by subsystem and include recovery hints.

use std::io;

use thiserror::Error;

/// Top-level error type for fleetd
#[derive(Debug, Error)]
pub enum FleetError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Datastore errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Firewall and NAT rule errors
    #[error("Firewall error: {0}")]
    Firewall(#[from] FirewallError),

    /// DNS record and service errors
    #[error("DNS error: {0}")]
    Dns(#[from] DnsError),

    /// Provisioning worker errors
    #[error("Provision error: {0}")]
    Provision(#[from] ProvisionError),

    /// Container runtime errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FleetError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Store(e) => e.is_recoverable(),
            Self::Firewall(e) => e.is_recoverable(),
            Self::Dns(e) => e.is_recoverable(),
            Self::Provision(e) => e.is_recoverable(),
            Self::Runtime(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Datastore errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Referenced row does not exist
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Write conflicts with an already-persisted value
    #[error("{entity} {key} already has a persisted value")]
    Conflict { entity: &'static str, key: String },
}

impl StoreError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Busy/locked databases clear up on retry
            Self::Database(sqlx::Error::Database(e)) => {
                e.message().contains("locked") || e.message().contains("busy")
            }
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            Self::Database(_) => false,
            Self::Migration(_) => false,
            Self::NotFound { .. } => false,
            Self::Conflict { .. } => false,
        }
    }

    /// Create a not found error
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Conflict {
            entity,
            key: key.into(),
        }
    }
}

/// Firewall and NAT rule errors
#[derive(Debug, Error)]
pub enum FirewallError {
    /// No robot is registered for the anchor
    #[error("No robot registered for anchor: {anchor}")]
    RobotNotFound { anchor: String },

    /// The anchor's robot has no addressed container
    #[error("No addressed container for anchor: {anchor}")]
    ContainerNotReady { anchor: String },

    /// The external packet filter command failed
    #[error("Packet filter command failed ({command}): {reason}")]
    CommandFailed { command: String, reason: String },

    /// The monotonic WebSocket port generator ran out of ports
    #[error("WebSocket port space exhausted")]
    PortExhausted,

    /// Store lookup or write failed
    #[error("Firewall store error: {0}")]
    Store(#[from] StoreError),

    /// I/O error invoking the packet filter
    #[error("Firewall I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl FirewallError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RobotNotFound { .. } => false,
            Self::ContainerNotReady { .. } => true,
            Self::CommandFailed { .. } => true,
            Self::PortExhausted => false,
            Self::Store(e) => e.is_recoverable(),
            Self::IoError(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a robot not found error
    pub fn robot_not_found(anchor: impl Into<String>) -> Self {
        Self::RobotNotFound {
            anchor: anchor.into(),
        }
    }

    /// Create a container not ready error
    pub fn container_not_ready(anchor: impl Into<String>) -> Self {
        Self::ContainerNotReady {
            anchor: anchor.into(),
        }
    }
}

/// DNS record and service errors
#[derive(Debug, Error)]
pub enum DnsError {
    /// No robot is registered for the anchor
    #[error("No robot registered for anchor: {anchor}")]
    RobotNotFound { anchor: String },

    /// The anchor's robot has no addressed container
    #[error("No addressed container for anchor: {anchor}")]
    ContainerNotReady { anchor: String },

    /// Writing the hosts file failed
    #[error("Failed to write hosts file {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    /// Restarting the DNS service failed
    #[error("DNS service restart failed: {reason}")]
    RestartFailed { reason: String },

    /// Store lookup failed while resolving a record
    #[error("DNS store lookup failed: {0}")]
    Store(#[from] StoreError),

    /// I/O error
    #[error("DNS I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DnsError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::RobotNotFound { .. } => false,
            Self::ContainerNotReady { .. } => true,
            Self::WriteFailed { .. } => true,
            Self::RestartFailed { .. } => true,
            Self::Store(e) => e.is_recoverable(),
            Self::IoError(_) => true,
        }
    }

    /// Create a write failed error
    pub fn write_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a restart failed error
    pub fn restart_failed(reason: impl Into<String>) -> Self {
        Self::RestartFailed {
            reason: reason.into(),
        }
    }
}

/// Provisioning worker errors
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Address space exhausted for a container id
    #[error("Address space exhausted for container id {id}")]
    AddressExhausted { id: i64 },

    /// The claimed container has no registered robot
    #[error("No robot registered for container id {container_id}")]
    RobotNotFound { container_id: i64 },

    /// Store operation failed
    #[error("Provision store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem resource could not be created
    #[error("Failed to create {path}: {reason}")]
    ResourceFailed { path: String, reason: String },

    /// I/O error
    #[error("Provision I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ProvisionError {
    /// Check if this error is recoverable
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Exhaustion never clears up; the worker must stop
            Self::AddressExhausted { .. } => false,
            Self::RobotNotFound { .. } => true,
            Self::Store(e) => e.is_recoverable(),
            Self::ResourceFailed { .. } => true,
            Self::IoError(_) => true,
        }
    }

    /// Create a resource failed error
    pub fn resource_failed(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ResourceFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Container runtime errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Failed to spawn the runtime command
    #[error("Failed to spawn {command}: {reason}")]
    SpawnFailed { command: String, reason: String },

    /// Runtime command exited non-zero
    #[error("{command} exited with status {code} for container {anchor}")]
    NonZeroExit {
        command: String,
        anchor: String,
        code: i32,
    },

    /// I/O error
    #[error("Runtime I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl RuntimeError {
    /// Runtime failures are logged and not retried within a batch
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        true
    }

    /// Create a spawn failed error
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a non-zero exit error
    pub fn non_zero_exit(command: impl Into<String>, anchor: impl Into<String>, code: i32) -> Self {
        Self::NonZeroExit {
            command: command.into(),
            anchor: anchor.into(),
            code,
        }
    }
}

/// Type alias for Result with FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

// src/errors.rs

//! Crate-wide error types.
//!
//! [`SchedError`] covers conditions a caller sees synchronously (a full
//! entity queue, a stopped entity, bad configuration). Everything that happens
//! to a job *after* it was accepted is reported through its finished fence as
//! a [`FenceError`] instead.

use thiserror::Error;

use crate::types::EngineKind;

#[derive(Error, Debug)]
pub enum SchedError {
    #[error("Entity {entity} queue full ({capacity} unfinished jobs)")]
    QueueFull { entity: u64, capacity: usize },

    #[error("Entity {0} has been destroyed")]
    EntityStopped(u64),

    #[error("Scheduler '{0}' is draining; submissions are rejected")]
    Draining(String),

    #[error("Engine '{0}' is not enabled on this device")]
    EngineNotEnabled(EngineKind),

    #[error("Sequence {seq} on '{engine}' has not been submitted (latest is {latest})")]
    InvalidSequence {
        engine: EngineKind,
        seq: u64,
        latest: u64,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SchedError {
    /// Whether the caller may retry the same submission later.
    pub fn is_backpressure(&self) -> bool {
        matches!(self, SchedError::QueueFull { .. })
    }
}

/// Failure carried by a signaled fence.
///
/// Cloned into every waiter, so it only holds owned, cheap data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FenceError {
    #[error("job cancelled before reaching hardware")]
    Cancelled,

    #[error("job timed out on hardware")]
    TimedOut,

    #[error("job timed out waiting for a dependency")]
    DependencyTimeout,

    #[error("dependency resolution failed: {0}")]
    Dependency(String),

    #[error("upstream dependency failed: {0}")]
    DependencyFailed(Box<FenceError>),

    #[error("hardware submission failed: {0}")]
    Hardware(String),

    #[error("device lost during recovery")]
    DeviceLost,
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SchedError>;
pub type FenceResult = std::result::Result<(), FenceError>;

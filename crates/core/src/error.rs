//! Error types for the history engine
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Reentrancy rejection (undo/redo while a persistence round-trip is in
//! flight) is deliberately absent: those calls report `Ok(false)` instead.

use crate::types::{CommandId, CommandKind, TargetId};
use std::io;
use thiserror::Error;

/// Result type alias for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Error types for the history engine
#[derive(Debug, Error)]
pub enum HistoryError {
    /// A handler's apply or invert failed
    #[error("Apply failed for {kind} command: {message}")]
    Apply {
        /// Kind of the command whose effect failed
        kind: CommandKind,
        /// Handler-provided reason
        message: String,
    },

    /// The persistence channel rejected a record
    #[error("Durability failure for command {id}: {reason}")]
    Durability {
        /// Command whose round-trip failed
        id: CommandId,
        /// Channel-provided reason
        reason: String,
    },

    /// The channel acknowledged a different command than the one stored
    #[error("Identity mismatch: expected command {expected}, channel acknowledged {actual}")]
    IdentityMismatch {
        /// Id the engine stored
        expected: CommandId,
        /// Id carried by the acknowledgement
        actual: CommandId,
    },

    /// The handler for this kind is still bound to another command
    #[error("Handler for {0} is still bound to a command")]
    HandlerInUse(CommandKind),

    /// No handler factory was registered for this kind
    #[error("No handler registered for {0}")]
    HandlerNotRegistered(CommandKind),

    /// A command references an identity with no live handle
    #[error("Unknown target: {0}")]
    UnknownTarget(TargetId),

    /// Unrecognized command kind tag
    #[error("Unknown command kind: {0}")]
    UnknownKind(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// I/O error (spool files, directory backends)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A completion was dropped before a value was delivered
    #[error("Persistence channel closed before completing")]
    ChannelClosed,

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl HistoryError {
    /// Create an apply failure for a command kind
    pub fn apply(kind: CommandKind, message: impl Into<String>) -> Self {
        HistoryError::Apply {
            kind,
            message: message.into(),
        }
    }

    /// Create a durability failure for a command
    pub fn durability(id: CommandId, reason: impl Into<String>) -> Self {
        HistoryError::Durability {
            id,
            reason: reason.into(),
        }
    }

    /// Create an invalid-operation error
    pub fn invalid(message: impl Into<String>) -> Self {
        HistoryError::InvalidOperation(message.into())
    }

    /// True for failures of the persistence round-trip (the edit itself stays visible)
    pub fn is_durability_failure(&self) -> bool {
        matches!(
            self,
            HistoryError::Durability { .. }
                | HistoryError::IdentityMismatch { .. }
                | HistoryError::ChannelClosed
        )
    }
}

impl From<serde_json::Error> for HistoryError {
    fn from(e: serde_json::Error) -> Self {
        HistoryError::Serialization(e.to_string())
    }
}

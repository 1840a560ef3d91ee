//! Error types for toolgate
//!
//! Errors are grouped by how the caller is expected to react:
//!
//! - [`PermissionError::UnresolvedInvocation`] - retry once more messages are ingested
//! - [`PermissionError::DuplicateRequest`] - caller bug, fail this call only
//! - [`PermissionError::UnknownRequest`] - late or repeated answer, log and ignore
//! - [`PermissionError::Transport`] - the decision channel rejected the request
//! - [`PermissionError::Config`] - fix the coordinator configuration

use thiserror::Error;

use crate::permission::TransportError;

/// Errors produced by the permission coordinator and its components
#[derive(Debug, Error)]
pub enum PermissionError {
    /// No tool-use announcement matching this call has been ingested yet
    #[error("no announced invocation matches tool '{tool_name}' with the given input")]
    UnresolvedInvocation {
        /// Tool name the caller asked about
        tool_name: String,
    },

    /// A live request already exists for this invocation identifier
    #[error("a permission request is already pending for '{0}'")]
    DuplicateRequest(String),

    /// No live request exists for this identifier (resolved, cancelled, or never created)
    #[error("no pending permission request for '{0}'")]
    UnknownRequest(String),

    /// The decision transport failed to accept the request
    #[error("decision transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl PermissionError {
    /// Returns true if the caller may retry after further ingestion
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::UnresolvedInvocation { .. })
    }

    /// Returns true if this error should be logged and otherwise ignored
    pub fn is_ignorable(&self) -> bool {
        matches!(self, Self::UnknownRequest(_))
    }

    /// Returns true if this error indicates a logic defect in the caller
    pub fn is_logic_defect(&self) -> bool {
        matches!(self, Self::DuplicateRequest(_))
    }

    /// Returns true if this is an unresolved invocation
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::UnresolvedInvocation { .. })
    }
}

/// Result type for toolgate operations
pub type Result<T> = std::result::Result<T, PermissionError>;

//! Error types for ctxhost operations
//!
//! Every failure the core can produce is a variant of [`CoreError`]. Each
//! variant maps to:
//! - a wire-level [`ErrorKind`] (the `kind` string of an error response)
//! - a stable upper-snake error code for logging and client handling
//! - an optional structured `detail` object
//!
//! Errors are returned by value; the dispatcher pattern-matches on them and
//! turns them into structured responses instead of letting them escape.
//!
//! # Example
//!
//! ```rust
//! use ctxhost_core::error::{CoreError, ErrorKind};
//!
//! let err = CoreError::ToolNotFound { name: "ghost".to_string() };
//! assert_eq!(err.kind(), ErrorKind::NotFoundError);
//! assert_eq!(err.error_code(), "TOOL_NOT_FOUND");
//!
//! let body = err.to_error_body();
//! assert_eq!(body.kind, ErrorKind::NotFoundError);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::handler::HandlerError;
use crate::schema::ValidationError;

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Wire-level error kind carried in every error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Arguments did not satisfy the tool's input schema
    ValidationError,
    /// Unknown tool name or missing session
    NotFoundError,
    /// A tool with the same name is already registered
    DuplicateToolError,
    /// A session with the same id is already active
    DuplicateSessionError,
    /// The tool handler reported a failure
    ExecutionError,
    /// Saving or loading a session record failed
    PersistenceError,
    /// The caller withdrew the call before the handler settled
    Cancelled,
}

impl ErrorKind {
    /// The string used on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotFoundError => "NotFoundError",
            ErrorKind::DuplicateToolError => "DuplicateToolError",
            ErrorKind::DuplicateSessionError => "DuplicateSessionError",
            ErrorKind::ExecutionError => "ExecutionError",
            ErrorKind::PersistenceError => "PersistenceError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in core operations
#[derive(Error, Debug)]
pub enum CoreError {
    // ═══════════════════════════════════════════════════════════════════════
    // Dispatch errors
    // ═══════════════════════════════════════════════════════════════════════

    /// Arguments failed schema validation
    #[error("Invalid arguments: {0}")]
    Validation(#[from] ValidationError),

    /// No tool with this name is registered
    #[error("Tool not found: '{name}'. Call tools/list to see the registered tools.")]
    ToolNotFound { name: String },

    /// Registration conflict
    #[error("Tool already registered: '{name}'. Tool names must be unique.")]
    DuplicateTool { name: String },

    /// The handler failed; the cause is opaque to the core
    #[error("Tool '{name}' failed: {cause}")]
    Execution {
        name: String,
        #[source]
        cause: HandlerError,
    },

    /// The caller cancelled the call before the handler settled
    #[error("Call '{correlation_id}' was cancelled before the tool completed.")]
    Cancelled { correlation_id: String },

    // ═══════════════════════════════════════════════════════════════════════
    // Session errors
    // ═══════════════════════════════════════════════════════════════════════

    /// No active session, or no persisted record, with this id
    #[error("Session not found: '{session_id}'.")]
    SessionNotFound { session_id: String },

    /// An explicit session id collided with an active session
    #[error("Session already active: '{session_id}'. Use a different session id or load it instead.")]
    DuplicateSession { session_id: String },

    /// I/O or decoding failure while saving or loading
    #[error("Persistence failed for '{target}': {reason}")]
    Persistence { target: String, reason: String },
}

impl CoreError {
    /// Build an execution error from any displayable cause
    pub fn execution(name: impl Into<String>, cause: impl Into<HandlerError>) -> Self {
        CoreError::Execution {
            name: name.into(),
            cause: cause.into(),
        }
    }

    /// Build a persistence error
    pub fn persistence(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        CoreError::Persistence {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns the wire-level kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::ValidationError,
            CoreError::ToolNotFound { .. } | CoreError::SessionNotFound { .. } => {
                ErrorKind::NotFoundError
            }
            CoreError::DuplicateTool { .. } => ErrorKind::DuplicateToolError,
            CoreError::DuplicateSession { .. } => ErrorKind::DuplicateSessionError,
            CoreError::Execution { .. } => ErrorKind::ExecutionError,
            CoreError::Persistence { .. } => ErrorKind::PersistenceError,
            CoreError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Returns the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Validation(_) => "VALIDATION_FAILED",
            CoreError::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            CoreError::DuplicateTool { .. } => "DUPLICATE_TOOL",
            CoreError::Execution { .. } => "EXECUTION_FAILED",
            CoreError::Cancelled { .. } => "CANCELLED",
            CoreError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            CoreError::DuplicateSession { .. } => "DUPLICATE_SESSION",
            CoreError::Persistence { .. } => "PERSISTENCE_FAILED",
        }
    }

    /// Returns true if repeating the same call might succeed
    ///
    /// Validation, lookup and registration errors need different input.
    /// Handler failures are not retried by the core; retry policy belongs to
    /// the handler.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::Persistence { .. } | CoreError::Cancelled { .. }
        )
    }

    /// Structured detail for the error response, if any
    pub fn detail(&self) -> Option<Value> {
        match self {
            CoreError::Validation(err) => Some(err.detail()),
            CoreError::ToolNotFound { name }
            | CoreError::DuplicateTool { name }
            | CoreError::Execution { name, .. } => Some(json!({ "name": name })),
            CoreError::SessionNotFound { session_id }
            | CoreError::DuplicateSession { session_id } => {
                Some(json!({ "sessionId": session_id }))
            }
            CoreError::Persistence { target, .. } => Some(json!({ "target": target })),
            CoreError::Cancelled { .. } => None,
        }
    }

    /// Converts this error into the `error` object of a response
    pub fn to_error_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
            detail: self.detail(),
        }
    }
}

/// The `error` member of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Wire-level kind
    pub kind: ErrorKind,
    /// Human-readable message
    pub message: String,
    /// Kind-specific structured detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

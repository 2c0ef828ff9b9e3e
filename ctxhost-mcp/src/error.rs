//! Error types for the ctxhost MCP server
//!
//! Only protocol failures become JSON-RPC errors. A tool that fails still
//! produces a successful `tools/call` result with `isError: true`.

use ctxhost_core::CoreError;
use thiserror::Error;

/// Result type for MCP operations
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur in the MCP server
#[derive(Error, Debug)]
pub enum McpError {
    /// The line was not valid JSON-RPC
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Unknown method
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Method parameters were missing or malformed
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// Startup or shutdown failure in the core
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// I/O error on the transport
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Get error code for the JSON-RPC protocol
    pub fn error_code(&self) -> i32 {
        match self {
            McpError::Parse(_) => -32700,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            McpError::Core(CoreError::DuplicateTool { .. }) => -32001,
            McpError::Core(CoreError::SessionNotFound { .. }) => -32002,
            McpError::Core(_) | McpError::Io(_) | McpError::Internal(_) => -32603,
        }
    }

    /// JSON-RPC error object for this error
    pub fn to_rpc_error(&self) -> crate::server::RpcError {
        crate::server::RpcError {
            code: self.error_code(),
            message: self.to_string(),
        }
    }
}

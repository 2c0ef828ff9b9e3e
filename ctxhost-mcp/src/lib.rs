//! ctxhost MCP Server Library
//!
//! Serves the ctxhost core over the Model Context Protocol on stdio.
//!
//! ## Architecture
//!
//! ```text
//! MCP client
//!        │  JSON-RPC (one request per line)
//!        ▼
//! ┌─────────────────┐
//! │   McpServer     │ ◄── This crate
//! │                 │
//! │  ┌───────────┐  │
//! │  │   Tools   │  │ - get_context
//! │  │           │  │ - list_sessions
//! │  │           │  │ - generate_code (with a CodeGenerator)
//! │  └───────────┘  │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  ctxhost-core   │
//! │                 │
//! │ Dispatcher      │
//! │ Session store   │
//! └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ctxhost_core::CoreConfig;
//! use ctxhost_mcp::McpServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = McpServer::builder(CoreConfig::from_env())
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     Arc::new(server).run_stdio().await.unwrap();
//! }
//! ```

pub mod error;
pub mod server;
pub mod tools;

pub use error::{McpError, McpResult};
pub use server::{McpServer, McpServerBuilder, RpcError, RpcRequest, RpcResponse};
pub use tools::{CodeGenerator, CommandGenerator, GeneratedCode, GenerationRequest};

/// Server metadata for MCP protocol
pub const SERVER_NAME: &str = "ctxhost";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

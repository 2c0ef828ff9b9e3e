//! # ctxhost core - tool dispatch with conversation context
//!
//! ctxhost exposes named, schema-validated tools to an external caller and
//! keeps a durable, per-session record of prior exchanges that tools can
//! consult as context.
//!
//! - **Registry**: tool definitions bound to their handlers, unique by name
//! - **Dispatcher**: resolve, validate, invoke, wrap; every failure becomes
//!   a structured response keyed by the caller's correlation id
//! - **Session store**: append-only histories, atomic snapshots, bounded
//!   context windows
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use ctxhost_core::{
//!     ContextView, CoreConfig, Dispatcher, FieldSpec, HandlerResult, SchemaDescriptor,
//!     SessionContextStore, ToolContext, ToolDefinition, ToolHandler, ToolRegistry, ToolRequest,
//! };
//! use serde_json::{json, Value};
//!
//! struct Shout;
//!
//! #[async_trait]
//! impl ToolHandler for Shout {
//!     async fn invoke(&self, args: Value, _context: ToolContext) -> HandlerResult {
//!         let text = args["text"].as_str().unwrap_or_default();
//!         Ok(json!({ "text": text.to_uppercase() }))
//!     }
//! }
//!
//! # tokio_test_block(async {
//! let config = CoreConfig::default();
//! let store = Arc::new(SessionContextStore::in_memory(&config));
//! let session = store.create_session(None).unwrap();
//!
//! let registry = Arc::new(ToolRegistry::new());
//! registry
//!     .register(
//!         ToolDefinition::new(
//!             "shout",
//!             "Upper-case some text",
//!             SchemaDescriptor::new().field("text", FieldSpec::string()).require("text"),
//!         ),
//!         Arc::new(Shout),
//!     )
//!     .unwrap();
//!
//! let dispatcher = Dispatcher::new(registry, &config);
//! let response = dispatcher
//!     .dispatch(
//!         ToolRequest::new("shout", json!({ "text": "hi" }), "1"),
//!         ContextView::new(store.clone(), session.id.clone(), config.context_window),
//!     )
//!     .await;
//!
//! assert_eq!(response.result().unwrap()["text"], "HI");
//! # });
//! # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod registry;
pub mod schema;
pub mod session;

// Re-export main types
pub use config::{CoreConfig, CoreConfigBuilder};
pub use dispatch::{Dispatcher, Outcome, ToolRequest, ToolResponse, TrackedCall};
pub use error::{CoreError, CoreResult, ErrorBody, ErrorKind};
pub use handler::{
    ContextProvider, ContextView, HandlerError, HandlerResult, ToolContext, ToolHandler,
};
pub use registry::{RegisteredTool, ToolDefinition, ToolRegistry};
pub use schema::{FieldSpec, FieldType, SchemaDescriptor, ValidationError, ValidationFailure};
pub use session::{
    FileSessionStorage, InMemorySessionStorage, Interaction, Session, SessionContextStore,
    SessionRecord, SessionStorage, SessionSummary, StoredSession,
};

//! The handler contract and the context a handler receives

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreResult;

/// Opaque failure reported by a handler
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// What a handler returns
pub type HandlerResult = Result<Value, HandlerError>;

/// A tool implementation
///
/// Handlers receive arguments that already passed schema validation. They
/// may suspend for as long as they need and may fail with any error; the
/// dispatcher turns failures into `ExecutionError` responses.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool
    async fn invoke(&self, args: Value, context: ToolContext) -> HandlerResult;
}

/// Per-call information handed to a handler
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Correlation id of the call
    pub correlation_id: String,

    /// Session the call runs in, if any
    pub session_id: Option<String>,

    /// Rendered context window of that session (may be empty)
    pub window: String,
}

/// Source of rendered context windows
///
/// Implemented by the session store. The dispatcher only asks for a window
/// once the tool has been found and its arguments validated.
pub trait ContextProvider: Send + Sync {
    /// Render the last `max_interactions` interactions of a session
    fn context_window(&self, session_id: &str, max_interactions: usize) -> CoreResult<String>;
}

/// A lazily rendered view of one session's recent history
#[derive(Clone)]
pub struct ContextView {
    provider: Option<Arc<dyn ContextProvider>>,
    session_id: Option<String>,
    max_interactions: usize,
}

impl ContextView {
    /// A view backed by a provider
    pub fn new(
        provider: Arc<dyn ContextProvider>,
        session_id: impl Into<String>,
        max_interactions: usize,
    ) -> Self {
        Self {
            provider: Some(provider),
            session_id: Some(session_id.into()),
            max_interactions,
        }
    }

    /// A view with no session behind it; always renders empty
    pub fn detached() -> Self {
        Self {
            provider: None,
            session_id: None,
            max_interactions: 0,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn max_interactions(&self) -> usize {
        self.max_interactions
    }

    /// Render the window
    ///
    /// A missing session renders as an empty window; the tool still runs.
    pub fn render(&self) -> String {
        let (Some(provider), Some(session_id)) = (&self.provider, &self.session_id) else {
            return String::new();
        };

        match provider.context_window(session_id, self.max_interactions) {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!("Context unavailable for session {}: {}", session_id, e);
                String::new()
            }
        }
    }
}

//! Dispatcher
//!
//! Turns one tool call into one response:
//!
//! 1. resolve the tool by name
//! 2. validate the arguments against its schema
//! 3. render the caller's context window and invoke the handler
//! 4. wrap the outcome, keyed by the caller's correlation id
//!
//! Nothing that goes wrong in a call escapes `dispatch`; every failure comes
//! back as an error response. Handlers run in their own task, so a panic is
//! reported as an `ExecutionError` and concurrent calls are unaffected.
//!
//! Each in-flight correlation id owns a [`CancellationToken`]. Cancelling it
//! stops the wait and aborts the handler task. Anything the handler already
//! committed to a session stays committed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult, ErrorBody, ErrorKind};
use crate::handler::{ContextView, ToolContext};
use crate::registry::ToolRegistry;
use crate::schema::validate;

fn empty_arguments() -> Value {
    Value::Object(Map::new())
}

/// A tool call as received from the host loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRequest {
    /// Tool name
    pub name: String,

    /// Tool arguments; `{}` when omitted
    #[serde(default = "empty_arguments")]
    pub arguments: Value,

    /// Caller-assigned token echoed in the response
    pub correlation_id: String,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, arguments: Value, correlation_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Success or failure of a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorBody),
}

/// The response to one tool call
///
/// Serializes as `{correlationId, result}` or `{correlationId, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub correlation_id: String,

    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ToolResponse {
    pub fn success(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(correlation_id: impl Into<String>, error: &CoreError) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Outcome::Error(error.to_error_body()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorBody> {
        match &self.outcome {
            Outcome::Error(body) => Some(body),
            Outcome::Result(_) => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error().map(|body| body.kind)
    }
}

struct InFlight {
    token: CancellationToken,
    calls: usize,
}

type InFlightTable = Arc<Mutex<HashMap<String, InFlight>>>;

/// A correlation id registered with a dispatcher
///
/// Cancellation applies from the moment the call is tracked, even before it
/// is dispatched. Dropping the call releases the id.
pub struct TrackedCall {
    table: InFlightTable,
    correlation_id: String,
    token: CancellationToken,
}

impl TrackedCall {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TrackedCall {
    fn drop(&mut self) {
        let mut in_flight = self.table.lock();
        if let Some(entry) = in_flight.get_mut(&self.correlation_id) {
            entry.calls -= 1;
            if entry.calls == 0 {
                in_flight.remove(&self.correlation_id);
            }
        }
    }
}

impl std::fmt::Debug for TrackedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedCall")
            .field("correlation_id", &self.correlation_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Validates, invokes and wraps tool calls
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    handler_timeout: Option<Duration>,
    in_flight: InFlightTable,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    pub fn new(registry: Arc<ToolRegistry>, config: &CoreConfig) -> Self {
        Self {
            registry,
            handler_timeout: config.handler_timeout(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Number of correlation ids currently in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel the call with this correlation id
    ///
    /// Returns false if no such call is in flight.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        match self.in_flight.lock().get(correlation_id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!("Cancelling call {}", correlation_id);
                true
            }
            None => false,
        }
    }

    /// Register a correlation id ahead of dispatch
    ///
    /// Host loops that hand calls to other tasks track them first, so a
    /// cancel read right after the call is not lost.
    pub fn track(&self, correlation_id: impl Into<String>) -> TrackedCall {
        let correlation_id = correlation_id.into();
        let token = {
            let mut in_flight = self.in_flight.lock();
            let entry = in_flight
                .entry(correlation_id.clone())
                .or_insert_with(|| InFlight {
                    token: CancellationToken::new(),
                    calls: 0,
                });
            entry.calls += 1;
            entry.token.clone()
        };

        TrackedCall {
            table: Arc::clone(&self.in_flight),
            correlation_id,
            token,
        }
    }

    /// Run one tool call
    pub async fn dispatch(&self, request: ToolRequest, context: ContextView) -> ToolResponse {
        let call = self.track(request.correlation_id.clone());
        self.dispatch_tracked(call, request, context).await
    }

    /// Run a call tracked earlier with [`Dispatcher::track`]
    ///
    /// Cancellation follows the tracked call's correlation id; the response
    /// carries the request's.
    pub async fn dispatch_tracked(
        &self,
        call: TrackedCall,
        request: ToolRequest,
        context: ContextView,
    ) -> ToolResponse {
        let ToolRequest {
            name,
            arguments,
            correlation_id,
        } = request;

        tracing::debug!("Dispatching {} ({})", name, correlation_id);

        match self.run(&name, arguments, &call, context).await {
            Ok(result) => ToolResponse::success(correlation_id, result),
            Err(err) => {
                match err.kind() {
                    ErrorKind::ExecutionError => {
                        tracing::warn!("Call {} failed: {}", correlation_id, err)
                    }
                    ErrorKind::Cancelled => tracing::info!("{}", err),
                    _ => tracing::debug!("Call {} rejected: {}", correlation_id, err),
                }
                ToolResponse::failure(correlation_id, &err)
            }
        }
    }

    async fn run(
        &self,
        name: &str,
        arguments: Value,
        call: &TrackedCall,
        context: ContextView,
    ) -> CoreResult<Value> {
        let tool = self.registry.resolve(name)?;
        validate(&arguments, &tool.definition.input_schema)?;

        let correlation_id = call.correlation_id();
        let token = &call.token;
        let cancelled = || CoreError::Cancelled {
            correlation_id: correlation_id.to_string(),
        };
        if token.is_cancelled() {
            return Err(cancelled());
        }

        let tool_context = ToolContext {
            correlation_id: correlation_id.to_string(),
            session_id: context.session_id().map(str::to_string),
            window: context.render(),
        };

        let handler = Arc::clone(&tool.handler);
        let mut task = tokio::spawn(async move { handler.invoke(arguments, tool_context).await });

        let timeout = self.handler_timeout;
        let deadline = async move {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                task.abort();
                Err(cancelled())
            }
            joined = &mut task => match joined {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(cause)) => Err(CoreError::execution(name, cause)),
                Err(e) if e.is_panic() => Err(CoreError::execution(name, "handler panicked")),
                Err(e) => Err(CoreError::execution(name, e.to_string())),
            },
            _ = deadline => {
                task.abort();
                let limit = timeout.unwrap_or_default();
                Err(CoreError::execution(
                    name,
                    format!("handler timed out after {} ms", limit.as_millis()),
                ))
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.registry.len())
            .field("handler_timeout", &self.handler_timeout)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

//! MCP Server protocol implementation
//!
//! Newline-delimited JSON-RPC 2.0. Each request runs on its own task and a
//! single writer task owns the output, so responses are written as they
//! complete and may come back out of order. Notifications are handled
//! inline by the reader.

use std::sync::Arc;

use ctxhost_core::{
    ContextView, CoreConfig, CoreError, Dispatcher, Outcome, SessionContextStore, ToolDefinition,
    ToolHandler, ToolRegistry, ToolRequest, ToolResponse, TrackedCall,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{McpError, McpResult};
use crate::tools::{register_builtin_tools, CodeGenerator};
use crate::{SERVER_NAME, SERVER_VERSION};

/// JSON-RPC version string
pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol revision implemented here
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// JSON-RPC response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &McpError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error.to_rpc_error()),
        }
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default = "empty_object")]
    arguments: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Correlation id for a JSON-RPC id (`"7"` and `7` map to the same id)
pub fn correlation_id(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `tools/call` result for a dispatch response
pub fn call_result(response: &ToolResponse) -> Value {
    let (text, is_error) = match &response.outcome {
        Outcome::Result(value) => (
            serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            false,
        ),
        Outcome::Error(body) => (format!("{}: {}", body.kind, body.message), true),
    };

    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
        "structuredContent": response,
    })
}

/// The MCP server
pub struct McpServer {
    dispatcher: Dispatcher,
    store: Arc<SessionContextStore>,
    session_id: String,
    context_window: usize,
}

impl McpServer {
    /// Start building a server
    pub fn builder(config: CoreConfig) -> McpServerBuilder {
        McpServerBuilder {
            config,
            store: None,
            resume: None,
            generator: None,
            tools: Vec::new(),
        }
    }

    /// The session tool calls run in
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &Arc<SessionContextStore> {
        &self.store
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Handle one raw line; `None` for notifications
    pub async fn handle_line(&self, line: &str) -> Option<RpcResponse> {
        match serde_json::from_str::<RpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(RpcResponse::failure(Value::Null, &McpError::Parse(e))),
        }
    }

    /// Handle a request; `None` for notifications
    pub async fn handle_request(&self, request: RpcRequest) -> Option<RpcResponse> {
        self.respond(request, None).await
    }

    /// A `tools/call` is tracked by the reader before its task starts, so a
    /// cancel on the next line always finds it
    fn track_call(&self, request: &RpcRequest) -> Option<TrackedCall> {
        match (&request.id, request.method.as_str()) {
            (Some(id), "tools/call") => Some(self.dispatcher.track(correlation_id(id))),
            _ => None,
        }
    }

    async fn respond(&self, request: RpcRequest, call: Option<TrackedCall>) -> Option<RpcResponse> {
        let RpcRequest {
            id, method, params, ..
        } = request;

        let Some(id) = id else {
            self.handle_notification(&method, &params);
            return None;
        };

        let result = match method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(&id, params, call).await,
            other => Err(McpError::MethodNotFound(other.to_string())),
        };

        Some(match result {
            Ok(value) => RpcResponse::success(id, value),
            Err(e) => {
                tracing::debug!("Request failed: {}", e);
                RpcResponse::failure(id, &e)
            }
        })
    }

    fn handle_notification(&self, method: &str, params: &Value) {
        match method {
            "notifications/cancelled" => {
                let Some(request_id) = params.get("requestId") else {
                    tracing::debug!("Cancellation without requestId ignored");
                    return;
                };
                let id = correlation_id(request_id);
                if !self.dispatcher.cancel(&id) {
                    tracing::debug!("Nothing in flight for {}", id);
                }
            }
            "notifications/initialized" => tracing::debug!("Client initialized"),
            other => tracing::debug!("Ignoring notification {}", other),
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            },
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "instructions": format!(
                "Tool calls run in session {}. Use get_context to review earlier turns and list_sessions to find saved sessions.",
                self.session_id
            )
        })
    }

    fn handle_tools_list(&self) -> Value {
        json!({ "tools": self.dispatcher.registry().list() })
    }

    async fn handle_tools_call(
        &self,
        id: &Value,
        params: Value,
        call: Option<TrackedCall>,
    ) -> McpResult<Value> {
        let params: CallParams =
            serde_json::from_value(params).map_err(|e| McpError::InvalidParams(e.to_string()))?;

        let request = ToolRequest::new(params.name, params.arguments, correlation_id(id));
        let call = call.unwrap_or_else(|| self.dispatcher.track(request.correlation_id.clone()));
        let view = ContextView::new(
            self.store.clone(),
            self.session_id.clone(),
            self.context_window,
        );

        let response = self.dispatcher.dispatch_tracked(call, request, view).await;
        Ok(call_result(&response))
    }

    /// Serve until the reader reaches end of input
    ///
    /// In-flight calls are drained and the session is saved before
    /// returning, also when reading or writing failed. The first such
    /// failure is returned afterwards.
    pub async fn run<R, W>(self: Arc<Self>, reader: R, writer: W) -> McpResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<RpcResponse>();

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(response) = rx.recv().await {
                let mut line = serde_json::to_vec(&response)
                    .map_err(|e| McpError::Internal(format!("failed to encode response: {}", e)))?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
            Ok::<(), McpError>(())
        });

        let mut requests = JoinSet::new();
        let mut lines = reader.lines();

        let mut read_failure = None;

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!("Failed to read request: {}", e);
                    read_failure = Some(McpError::Io(e));
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Unparseable request: {}", e);
                    send(&tx, RpcResponse::failure(Value::Null, &McpError::Parse(e)));
                    continue;
                }
            };

            if request.id.is_none() {
                self.handle_notification(&request.method, &request.params);
                continue;
            }

            let call = self.track_call(&request);
            let server = Arc::clone(&self);
            let tx = tx.clone();
            requests.spawn(async move {
                if let Some(response) = server.respond(request, call).await {
                    send(&tx, response);
                }
            });

            while let Some(joined) = requests.try_join_next() {
                if let Err(e) = joined {
                    tracing::error!("Request task failed: {}", e);
                }
            }
        }

        while let Some(joined) = requests.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Request task failed: {}", e);
            }
        }

        drop(tx);
        let written = match writer_task.await {
            Ok(result) => result,
            Err(e) => Err(McpError::Internal(format!("writer task failed: {}", e))),
        };
        if let Err(e) = &written {
            tracing::error!("Output failed: {}", e);
        }

        self.shutdown().await;

        match read_failure {
            Some(e) => Err(e),
            None => written,
        }
    }

    /// Serve over stdin/stdout
    pub async fn run_stdio(self: Arc<Self>) -> McpResult<()> {
        let reader = tokio::io::BufReader::new(tokio::io::stdin());
        self.run(reader, tokio::io::stdout()).await
    }

    /// Persist the current session if anything was said in it
    pub async fn shutdown(&self) {
        let pending = self
            .store
            .summary(&self.session_id)
            .map(|s| s.interaction_count > 0)
            .unwrap_or(false);

        if pending {
            if let Err(e) = self.store.save(&self.session_id).await {
                tracing::warn!("Failed to save session {} on shutdown: {}", self.session_id, e);
            }
        }
    }
}

fn send(tx: &mpsc::UnboundedSender<RpcResponse>, response: RpcResponse) {
    if tx.send(response).is_err() {
        tracing::warn!("Output closed; dropping response");
    }
}

/// Builder for McpServer
pub struct McpServerBuilder {
    config: CoreConfig,
    store: Option<Arc<SessionContextStore>>,
    resume: Option<String>,
    generator: Option<Arc<dyn CodeGenerator>>,
    tools: Vec<(ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl McpServerBuilder {
    /// Use an existing store instead of opening `config.context_dir`
    pub fn store(mut self, store: Arc<SessionContextStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Resume a persisted session instead of starting a fresh one
    pub fn resume_session(mut self, session_id: impl Into<String>) -> Self {
        self.resume = Some(session_id.into());
        self
    }

    /// Enable generate_code
    pub fn generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Register an additional tool
    pub fn tool(mut self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        self.tools.push((definition, handler));
        self
    }

    /// Build the server
    ///
    /// Fails on a duplicate tool name, before any request is accepted.
    pub async fn build(self) -> McpResult<McpServer> {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(SessionContextStore::open(&self.config)?),
        };

        let session_id = match self.resume {
            Some(id) => match store.load(&id).await {
                Ok(session) => {
                    tracing::info!("Resumed session {} ({} interactions)", id, session.len());
                    session.id
                }
                Err(CoreError::SessionNotFound { .. }) => {
                    tracing::info!("No saved record for {}; starting it fresh", id);
                    store.create_session(Some(&id))?.id
                }
                Err(e) => return Err(e.into()),
            },
            None => store.create_session(None)?.id,
        };

        let registry = Arc::new(ToolRegistry::new());
        register_builtin_tools(&registry, &store, self.generator)?;
        for (definition, handler) in self.tools {
            registry.register(definition, handler)?;
        }
        tracing::info!("Registered {} tool(s)", registry.len());

        Ok(McpServer {
            dispatcher: Dispatcher::new(registry, &self.config),
            store,
            session_id,
            context_window: self.config.context_window,
        })
    }
}

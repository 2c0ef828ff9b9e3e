//! End-to-end tests for the JSON-RPC host loop

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use ctxhost_core::{
    CoreConfig, CoreError, HandlerError, HandlerResult, SchemaDescriptor, SessionContextStore,
    ToolContext, ToolDefinition, ToolHandler,
};
use ctxhost_mcp::{
    CodeGenerator, GeneratedCode, GenerationRequest, McpError, McpServer, McpServerBuilder,
    RpcResponse,
};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, ReadBuf};
use tokio::sync::Notify;

struct Canned;

#[async_trait]
impl CodeGenerator for Canned {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedCode, HandlerError> {
        Ok(GeneratedCode {
            code: format!("// {}", request.prompt),
            language: request.language.unwrap_or_else(|| "rust".to_string()),
            explanation: String::new(),
        })
    }
}

/// Blocks until cancelled
struct Wait {
    started: Arc<Notify>,
}

#[async_trait]
impl ToolHandler for Wait {
    async fn invoke(&self, _args: Value, _context: ToolContext) -> HandlerResult {
        self.started.notify_one();
        std::future::pending::<()>().await;
        Ok(Value::Null)
    }
}

/// Finishes after a short delay
struct Slow;

#[async_trait]
impl ToolHandler for Slow {
    async fn invoke(&self, _args: Value, _context: ToolContext) -> HandlerResult {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(json!({ "done": true }))
    }
}

/// Appends to the current session without saving it
struct Note {
    store: Arc<SessionContextStore>,
}

#[async_trait]
impl ToolHandler for Note {
    async fn invoke(&self, args: Value, context: ToolContext) -> HandlerResult {
        let session_id = context.session_id.ok_or("no session")?;
        let text = args["text"].as_str().unwrap_or_default().to_string();
        self.store.add_interaction(&session_id, text, "noted", None)?;
        Ok(json!({ "noted": true }))
    }
}

/// Input that fails after the buffered lines
struct BrokenInput;

impl AsyncRead for BrokenInput {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Ready(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "input lost",
        )))
    }
}

fn note_server(store: &Arc<SessionContextStore>, config: CoreConfig) -> McpServerBuilder {
    McpServer::builder(config)
        .store(Arc::clone(store))
        .tool(
            ToolDefinition::new("note", "Remembers a line", SchemaDescriptor::new()),
            Arc::new(Note {
                store: Arc::clone(store),
            }),
        )
}

struct Client {
    input: tokio::io::DuplexStream,
    output: tokio::io::Lines<BufReader<tokio::io::DuplexStream>>,
}

impl Client {
    async fn send(&mut self, message: Value) {
        let mut line = serde_json::to_vec(&message).unwrap();
        line.push(b'\n');
        self.input.write_all(&line).await.unwrap();
    }

    async fn recv(&mut self) -> RpcResponse {
        let line = self.output.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }
}

async fn start(server: McpServer) -> (Client, tokio::task::JoinHandle<Result<(), McpError>>) {
    let (client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);

    let server = Arc::new(server);
    let handle = tokio::spawn(server.run(BufReader::new(server_in), server_out));

    let client = Client {
        input: client_in,
        output: BufReader::new(client_out).lines(),
    };
    (client, handle)
}

fn call(id: u64, name: &str, arguments: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
}

#[tokio::test]
async fn test_generate_then_get_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::builder().context_dir(dir.path()).build();
    let server = McpServer::builder(config)
        .generator(Arc::new(Canned))
        .build()
        .await
        .unwrap();
    let session_id = server.session_id().to_string();
    let (mut client, handle) = start(server).await;

    client
        .send(json!({ "jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {} }))
        .await;
    client
        .send(json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .await;
    let init = client.recv().await;
    assert_eq!(init.id, json!(1));
    assert!(init.result.unwrap()["capabilities"]["tools"].is_object());

    client
        .send(json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .await;
    let tools = client.recv().await.result.unwrap();
    let names: Vec<&str> = tools["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["generate_code", "get_context", "list_sessions"]);
    assert_eq!(tools["tools"][0]["inputSchema"]["required"], json!(["prompt"]));

    client
        .send(call(3, "generate_code", json!({ "prompt": "hello world", "language": "go" })))
        .await;
    let generated = client.recv().await.result.unwrap();
    assert_eq!(generated["isError"], false);
    assert_eq!(generated["structuredContent"]["result"]["code"], "// hello world");
    assert_eq!(generated["structuredContent"]["result"]["session_id"], session_id.as_str());

    client.send(call(4, "get_context", json!({ "max_items": 5 }))).await;
    let context = client.recv().await.result.unwrap();
    let window = context["structuredContent"]["result"]["context"].as_str().unwrap();
    assert!(window.contains("User: hello world"));
    assert!(window.contains("Assistant: // hello world"));

    client.send(call(5, "list_sessions", json!({}))).await;
    let listed = client.recv().await.result.unwrap();
    assert_eq!(listed["structuredContent"]["result"]["count"], 1);

    drop(client);
    handle.await.unwrap().unwrap();
    assert!(dir.path().join(format!("session_{}.json", session_id)).exists());
}

#[tokio::test]
async fn test_validation_error_is_tool_result() {
    let config = CoreConfig::default();
    let server = McpServer::builder(config.clone())
        .store(Arc::new(SessionContextStore::in_memory(&config)))
        .generator(Arc::new(Canned))
        .build()
        .await
        .unwrap();
    let (mut client, handle) = start(server).await;

    client
        .send(call(1, "generate_code", json!({ "language": "go" })))
        .await;
    let response = client.recv().await;

    assert!(response.error.is_none());
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["error"]["kind"], "ValidationError");
    assert_eq!(result["structuredContent"]["error"]["detail"]["field"], "prompt");

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_notification_releases_call() {
    let config = CoreConfig::default();
    let started = Arc::new(Notify::new());
    let server = McpServer::builder(config.clone())
        .store(Arc::new(SessionContextStore::in_memory(&config)))
        .tool(
            ToolDefinition::new("wait", "Waits forever", SchemaDescriptor::new()),
            Arc::new(Wait {
                started: Arc::clone(&started),
            }),
        )
        .build()
        .await
        .unwrap();
    let (mut client, handle) = start(server).await;

    client.send(call(10, "wait", json!({}))).await;
    started.notified().await;

    client.send(json!({ "jsonrpc": "2.0", "id": 11, "method": "ping" })).await;
    let pong = client.recv().await;
    assert_eq!(pong.id, json!(11));

    client
        .send(json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 10, "reason": "user abort" }
        }))
        .await;

    let cancelled = client.recv().await;
    assert_eq!(cancelled.id, json!(10));
    let result = cancelled.result.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["error"]["kind"], "Cancelled");

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_cancel_right_behind_call_is_honoured() {
    let config = CoreConfig::default();
    let server = McpServer::builder(config.clone())
        .store(Arc::new(SessionContextStore::in_memory(&config)))
        .tool(
            ToolDefinition::new("slow", "Takes a while", SchemaDescriptor::new()),
            Arc::new(Slow),
        )
        .build()
        .await
        .unwrap();
    let (mut client, handle) = start(server).await;

    let mut batch = serde_json::to_vec(&call(1, "slow", json!({}))).unwrap();
    batch.push(b'\n');
    batch.extend(
        serde_json::to_vec(&json!({
            "jsonrpc": "2.0",
            "method": "notifications/cancelled",
            "params": { "requestId": 1 }
        }))
        .unwrap(),
    );
    batch.push(b'\n');
    client.input.write_all(&batch).await.unwrap();

    let response = client.recv().await;
    assert_eq!(response.id, json!(1));
    let result = response.result.unwrap();
    assert_eq!(result["isError"], true);
    assert_eq!(result["structuredContent"]["error"]["kind"], "Cancelled");

    drop(client);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_session_saved_when_output_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::builder().context_dir(dir.path()).build();
    let store = Arc::new(SessionContextStore::open(&config).unwrap());
    let server = note_server(&store, config).build().await.unwrap();
    let session_id = server.session_id().to_string();

    let (client_in, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_out) = tokio::io::duplex(64 * 1024);
    drop(client_out);
    let handle = tokio::spawn(Arc::new(server).run(BufReader::new(server_in), server_out));

    let mut client_in = client_in;
    let mut line = serde_json::to_vec(&call(1, "note", json!({ "text": "keep me" }))).unwrap();
    line.push(b'\n');
    client_in.write_all(&line).await.unwrap();
    drop(client_in);

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(McpError::Io(_))));

    let reloaded = SessionContextStore::open(&CoreConfig::builder().context_dir(dir.path()).build())
        .unwrap();
    let session = reloaded.load(&session_id).await.unwrap();
    assert_eq!(session.history()[0].user, "keep me");
}

#[tokio::test]
async fn test_session_saved_when_input_fails() {
    let config = CoreConfig::default();
    let store = Arc::new(SessionContextStore::in_memory(&config));
    let server = Arc::new(note_server(&store, config).build().await.unwrap());
    let session_id = server.session_id().to_string();

    let mut lines = serde_json::to_vec(&call(1, "note", json!({ "text": "before the fault" }))).unwrap();
    lines.push(b'\n');
    let reader = BufReader::new(std::io::Cursor::new(lines).chain(BrokenInput));

    let outcome = Arc::clone(&server).run(reader, tokio::io::sink()).await;
    assert!(matches!(outcome, Err(McpError::Io(_))));

    let summary = store.summary(&session_id).unwrap();
    assert_eq!(summary.interaction_count, 1);
    assert!(summary.location.is_some());
}

#[tokio::test]
async fn test_duplicate_tool_fails_build() {
    let config = CoreConfig::default();
    let result = McpServer::builder(config.clone())
        .store(Arc::new(SessionContextStore::in_memory(&config)))
        .tool(
            ToolDefinition::new("get_context", "Shadows a built-in", SchemaDescriptor::new()),
            Arc::new(Wait {
                started: Arc::new(Notify::new()),
            }),
        )
        .build()
        .await;

    match result {
        Err(McpError::Core(CoreError::DuplicateTool { name })) => assert_eq!(name, "get_context"),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("duplicate tool was accepted"),
    }
}

#[tokio::test]
async fn test_resume_saved_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = CoreConfig::builder().context_dir(dir.path()).build();

    let store = SessionContextStore::open(&config).unwrap();
    store.create_session(Some("earlier")).unwrap();
    store.add_interaction("earlier", "first question", "first answer", None).unwrap();
    store.save("earlier").await.unwrap();

    let server = McpServer::builder(config)
        .resume_session("earlier")
        .build()
        .await
        .unwrap();
    assert_eq!(server.session_id(), "earlier");

    let response = server
        .handle_line(&call(1, "get_context", json!({})).to_string())
        .await
        .unwrap();
    let result = response.result.unwrap();
    assert!(result["structuredContent"]["result"]["context"]
        .as_str()
        .unwrap()
        .contains("User: first question"));
}

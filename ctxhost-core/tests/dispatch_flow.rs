//! Dispatcher and store working together

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctxhost_core::{
    ContextProvider, ContextView, CoreConfig, CoreError, CoreResult, Dispatcher, ErrorKind,
    FieldSpec, HandlerResult, SchemaDescriptor, SessionContextStore, ToolContext, ToolDefinition,
    ToolHandler, ToolRegistry, ToolRequest,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// Counts how often the store is asked for a window
struct Tracked {
    store: Arc<SessionContextStore>,
    reads: AtomicUsize,
}

impl ContextProvider for Tracked {
    fn context_window(&self, session_id: &str, max_interactions: usize) -> CoreResult<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.store.get_context(session_id, max_interactions)
    }
}

/// Records the exchange, then waits to be released
struct Remember {
    store: Arc<SessionContextStore>,
    calls: AtomicUsize,
    committed: Notify,
    release: Notify,
}

#[async_trait]
impl ToolHandler for Remember {
    async fn invoke(&self, args: Value, context: ToolContext) -> HandlerResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let session_id = context.session_id.ok_or("no session")?;
        let prompt = args["prompt"].as_str().unwrap_or_default().to_string();

        self.store
            .add_interaction(&session_id, prompt, "noted", None)?;
        self.committed.notify_one();
        self.release.notified().await;

        Ok(json!({ "saw": context.window }))
    }
}

struct Slow {
    delay: Duration,
}

#[async_trait]
impl ToolHandler for Slow {
    async fn invoke(&self, _args: Value, context: ToolContext) -> HandlerResult {
        tokio::time::sleep(self.delay).await;
        Ok(json!({ "correlation": context.correlation_id }))
    }
}

struct Broken;

#[async_trait]
impl ToolHandler for Broken {
    async fn invoke(&self, _args: Value, _context: ToolContext) -> HandlerResult {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "backend down").into())
    }
}

struct Fixture {
    store: Arc<SessionContextStore>,
    remember: Arc<Remember>,
    dispatcher: Arc<Dispatcher>,
    session_id: String,
}

fn fixture() -> Fixture {
    let config = CoreConfig::default();
    let store = Arc::new(SessionContextStore::in_memory(&config));
    let session_id = store.create_session(None).unwrap().id;

    let remember = Arc::new(Remember {
        store: Arc::clone(&store),
        calls: AtomicUsize::new(0),
        committed: Notify::new(),
        release: Notify::new(),
    });

    let prompt_schema = || {
        SchemaDescriptor::new()
            .field("prompt", FieldSpec::string().describe("What to do"))
            .require("prompt")
    };

    let registry = Arc::new(ToolRegistry::new());
    registry
        .register(
            ToolDefinition::new("generate", "Remember a prompt", prompt_schema()),
            remember.clone(),
        )
        .unwrap();
    registry
        .register(
            ToolDefinition::new("slow", "Answer after a delay", SchemaDescriptor::new()),
            Arc::new(Slow {
                delay: Duration::from_millis(30),
            }),
        )
        .unwrap();
    registry
        .register(
            ToolDefinition::new("broken", "Always fails", SchemaDescriptor::new()),
            Arc::new(Broken),
        )
        .unwrap();

    Fixture {
        store,
        remember,
        dispatcher: Arc::new(Dispatcher::new(registry, &config)),
        session_id,
    }
}

impl Fixture {
    fn view(&self) -> ContextView {
        ContextView::new(self.store.clone(), self.session_id.clone(), 5)
    }
}

#[test]
fn test_duplicate_tool_name_keeps_one() {
    let registry = ToolRegistry::new();
    let schema = SchemaDescriptor::new();

    registry
        .register(ToolDefinition::new("x", "first", schema.clone()), Arc::new(Broken))
        .unwrap();
    let err = registry
        .register(ToolDefinition::new("x", "second", schema), Arc::new(Broken))
        .unwrap_err();

    assert!(matches!(err, CoreError::DuplicateTool { .. }));
    assert_eq!(err.kind(), ErrorKind::DuplicateToolError);

    let tools = registry.list();
    assert_eq!(tools.iter().filter(|t| t.name == "x").count(), 1);
}

#[tokio::test]
async fn test_missing_prompt_never_reaches_handler() {
    let fx = fixture();

    let response = fx
        .dispatcher
        .dispatch(
            ToolRequest::new("generate", json!({ "language": "rust" }), "v-1"),
            fx.view(),
        )
        .await;

    assert_eq!(response.error_kind(), Some(ErrorKind::ValidationError));
    assert_eq!(fx.remember.calls.load(Ordering::SeqCst), 0);
    assert!(fx.store.snapshot(&fx.session_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_ghost_tool_leaves_store_alone() {
    let fx = fixture();
    let tracked = Arc::new(Tracked {
        store: Arc::clone(&fx.store),
        reads: AtomicUsize::new(0),
    });

    let response = fx
        .dispatcher
        .dispatch(
            ToolRequest::new("ghost", json!({ "prompt": "boo" }), "g-1"),
            ContextView::new(tracked.clone(), fx.session_id.clone(), 5),
        )
        .await;

    let error = response.error().unwrap();
    assert_eq!(error.kind, ErrorKind::NotFoundError);
    assert_eq!(error.detail.as_ref().unwrap()["name"], "ghost");
    assert_eq!(tracked.reads.load(Ordering::SeqCst), 0);
    assert!(fx.store.snapshot(&fx.session_id).unwrap().is_empty());
}

#[tokio::test]
async fn test_handler_sees_prior_context() {
    let fx = fixture();
    fx.store
        .add_interaction(&fx.session_id, "earlier question", "earlier answer", None)
        .unwrap();

    let call = {
        let dispatcher = Arc::clone(&fx.dispatcher);
        let view = fx.view();
        tokio::spawn(async move {
            dispatcher
                .dispatch(ToolRequest::new("generate", json!({ "prompt": "next" }), "h-1"), view)
                .await
        })
    };

    fx.remember.committed.notified().await;
    fx.remember.release.notify_one();

    let response = call.await.unwrap();
    let saw = response.result().unwrap()["saw"].as_str().unwrap().to_string();
    assert!(saw.contains("User: earlier question"));
    assert!(!saw.contains("User: next"));
    assert_eq!(fx.store.snapshot(&fx.session_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_keeps_committed_interaction() {
    let fx = fixture();

    let call = {
        let dispatcher = Arc::clone(&fx.dispatcher);
        let view = fx.view();
        tokio::spawn(async move {
            dispatcher
                .dispatch(ToolRequest::new("generate", json!({ "prompt": "keep me" }), "k-1"), view)
                .await
        })
    };

    fx.remember.committed.notified().await;
    assert!(fx.dispatcher.cancel("k-1"));

    let response = call.await.unwrap();
    assert_eq!(response.correlation_id, "k-1");
    assert_eq!(response.error_kind(), Some(ErrorKind::Cancelled));

    let session = fx.store.snapshot(&fx.session_id).unwrap();
    assert_eq!(session.len(), 1);
    assert_eq!(session.history()[0].user, "keep me");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failures_do_not_disturb_concurrent_calls() {
    let fx = fixture();

    let calls: Vec<_> = (0..6)
        .map(|i| {
            let dispatcher = Arc::clone(&fx.dispatcher);
            let name = if i % 2 == 0 { "slow" } else { "broken" };
            tokio::spawn(async move {
                dispatcher
                    .dispatch(
                        ToolRequest::new(name, json!({}), format!("m-{}", i)),
                        ContextView::detached(),
                    )
                    .await
            })
        })
        .collect();

    for (i, call) in calls.into_iter().enumerate() {
        let response = call.await.unwrap();
        assert_eq!(response.correlation_id, format!("m-{}", i));

        if i % 2 == 0 {
            assert_eq!(response.result().unwrap()["correlation"], format!("m-{}", i));
        } else {
            let error = response.error().unwrap();
            assert_eq!(error.kind, ErrorKind::ExecutionError);
            assert!(error.message.contains("backend down"));
        }
    }

    assert_eq!(fx.dispatcher.in_flight(), 0);
}

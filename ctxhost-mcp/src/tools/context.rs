//! Context tools: `get_context` and `list_sessions`

use std::sync::Arc;

use async_trait::async_trait;
use ctxhost_core::{
    FieldSpec, HandlerResult, SchemaDescriptor, SessionContextStore, ToolContext, ToolDefinition,
    ToolHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// get_context tool definition
pub fn get_context_tool() -> ToolDefinition {
    ToolDefinition::new(
        "get_context",
        "Show the recent conversation of a session, including previously generated code. Defaults to the current session.",
        SchemaDescriptor::new()
            .field(
                "session_id",
                FieldSpec::string().describe("Session to read (optional). Defaults to the current session"),
            )
            .field(
                "max_items",
                FieldSpec::number()
                    .describe("Maximum number of interactions to include (default: 5)")
                    .with_default(5),
            ),
    )
}

/// list_sessions tool definition
pub fn list_sessions_tool() -> ToolDefinition {
    ToolDefinition::new(
        "list_sessions",
        "List every saved session, newest first.",
        SchemaDescriptor::new(),
    )
}

/// Input for get_context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetContextInput {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub max_items: Option<f64>,
}

impl GetContextInput {
    /// Window size; fractions round down and negatives become zero
    pub fn window(&self, default: usize) -> usize {
        match self.max_items {
            Some(n) if n.is_finite() && n > 0.0 => n.floor() as usize,
            Some(_) => 0,
            None => default,
        }
    }
}

/// Handler for get_context
pub struct GetContextTool {
    store: Arc<SessionContextStore>,
}

impl GetContextTool {
    pub fn new(store: Arc<SessionContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for GetContextTool {
    async fn invoke(&self, args: Value, context: ToolContext) -> HandlerResult {
        let input: GetContextInput = serde_json::from_value(args)?;
        let max = input.window(self.store.default_window());

        let current = context.session_id;
        let requested = input.session_id.filter(|id| !id.is_empty());

        match (requested, current) {
            // Another session: read its record without activating it
            (Some(other), current) if Some(&other) != current.as_ref() => {
                let (window, summary) = self.store.persisted_context(&other, max).await?;
                Ok(json!({
                    "success": true,
                    "session_id": other,
                    "context": window,
                    "summary": summary,
                    "message": format!("Loaded context of session {}.", other),
                }))
            }
            (_, Some(current)) => {
                let window = self.store.get_context(&current, max)?;
                let summary = self.store.summary(&current)?;
                Ok(json!({
                    "success": true,
                    "session_id": current,
                    "context": window,
                    "summary": summary,
                    "message": "Context of the current session.",
                }))
            }
            (_, None) => Err("no current session; pass session_id".into()),
        }
    }
}

/// Handler for list_sessions
pub struct ListSessionsTool {
    store: Arc<SessionContextStore>,
}

impl ListSessionsTool {
    pub fn new(store: Arc<SessionContextStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolHandler for ListSessionsTool {
    async fn invoke(&self, _args: Value, _context: ToolContext) -> HandlerResult {
        let sessions = self.store.list_sessions().await?;
        Ok(json!({
            "success": true,
            "count": sessions.len(),
            "message": format!("Found {} session(s).", sessions.len()),
            "sessions": sessions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxhost_core::{CoreConfig, InMemorySessionStorage};

    fn context_for(session_id: &str) -> ToolContext {
        ToolContext {
            correlation_id: "t".to_string(),
            session_id: Some(session_id.to_string()),
            window: String::new(),
        }
    }

    #[test]
    fn test_window_from_max_items() {
        let input = |n: Option<f64>| GetContextInput {
            session_id: None,
            max_items: n,
        };
        assert_eq!(input(None).window(5), 5);
        assert_eq!(input(Some(2.9)).window(5), 2);
        assert_eq!(input(Some(-1.0)).window(5), 0);
        assert_eq!(input(Some(0.0)).window(5), 0);
    }

    #[tokio::test]
    async fn test_get_context_current_session() {
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        store.create_session(Some("now")).unwrap();
        store.add_interaction("now", "hello", "hi there", None).unwrap();

        let tool = GetContextTool::new(store);
        let result = tool.invoke(json!({}), context_for("now")).await.unwrap();

        assert_eq!(result["session_id"], "now");
        assert!(result["context"].as_str().unwrap().contains("User: hello"));
        assert_eq!(result["summary"]["interactionCount"], 1);
    }

    #[tokio::test]
    async fn test_get_context_other_session_stays_inactive() {
        let config = CoreConfig::default();
        let storage = Arc::new(InMemorySessionStorage::new());

        let earlier = SessionContextStore::new(storage.clone(), &config);
        earlier.create_session(Some("old")).unwrap();
        earlier.add_interaction("old", "before", "reply", None).unwrap();
        earlier.save("old").await.unwrap();

        let store = Arc::new(SessionContextStore::new(storage, &config));
        store.create_session(Some("now")).unwrap();

        let tool = GetContextTool::new(store.clone());
        let result = tool
            .invoke(json!({ "session_id": "old", "max_items": 1 }), context_for("now"))
            .await
            .unwrap();

        assert_eq!(result["session_id"], "old");
        assert!(result["context"].as_str().unwrap().contains("User: before"));
        assert_eq!(store.active_sessions(), vec!["now"]);
    }

    #[tokio::test]
    async fn test_get_context_unknown_session_fails() {
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        store.create_session(Some("now")).unwrap();

        let tool = GetContextTool::new(store);
        let err = tool
            .invoke(json!({ "session_id": "missing" }), context_for("now"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_list_sessions_counts() {
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        for id in ["a", "b"] {
            store.create_session(Some(id)).unwrap();
            store.save(id).await.unwrap();
        }

        let tool = ListSessionsTool::new(store);
        let result = tool.invoke(json!({}), ToolContext::default()).await.unwrap();

        assert_eq!(result["count"], 2);
        assert_eq!(result["sessions"].as_array().unwrap().len(), 2);
    }
}

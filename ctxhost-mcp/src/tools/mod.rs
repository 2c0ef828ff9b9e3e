//! Built-in tools
//!
//! These are the tools the server registers at startup. Any conflict with a
//! tool registered later is reported as `DuplicateTool` and stops startup.

pub mod context;
pub mod generate;

use std::sync::Arc;

use ctxhost_core::{CoreResult, SessionContextStore, ToolRegistry};

pub use context::{get_context_tool, list_sessions_tool, GetContextTool, ListSessionsTool};
pub use generate::{
    generate_code_tool, CodeGenerator, CommandGenerator, GenerateCodeTool, GeneratedCode,
    GenerationRequest,
};

/// Register the built-in tools
///
/// `generate_code` is only registered when a generator is supplied.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    store: &Arc<SessionContextStore>,
    generator: Option<Arc<dyn CodeGenerator>>,
) -> CoreResult<()> {
    if let Some(generator) = generator {
        registry.register(
            generate_code_tool(),
            Arc::new(GenerateCodeTool::new(generator, Arc::clone(store))),
        )?;
    }

    registry.register(
        get_context_tool(),
        Arc::new(GetContextTool::new(Arc::clone(store))),
    )?;
    registry.register(
        list_sessions_tool(),
        Arc::new(ListSessionsTool::new(Arc::clone(store))),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ctxhost_core::{CoreConfig, HandlerError};

    struct Nothing;

    #[async_trait]
    impl CodeGenerator for Nothing {
        async fn generate(&self, _request: GenerationRequest) -> Result<GeneratedCode, HandlerError> {
            Err("unused".into())
        }
    }

    #[test]
    fn test_builtin_tools_without_generator() {
        let registry = ToolRegistry::new();
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        register_builtin_tools(&registry, &store, None).unwrap();

        let names: Vec<String> = registry.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["get_context", "list_sessions"]);
    }

    #[test]
    fn test_builtin_tools_with_generator() {
        let registry = ToolRegistry::new();
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        register_builtin_tools(&registry, &store, Some(Arc::new(Nothing))).unwrap();

        assert!(registry.contains("generate_code"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_registering_twice_fails() {
        let registry = ToolRegistry::new();
        let store = Arc::new(SessionContextStore::in_memory(&CoreConfig::default()));
        register_builtin_tools(&registry, &store, None).unwrap();

        assert!(register_builtin_tools(&registry, &store, None).is_err());
        assert_eq!(registry.len(), 2);
    }
}

//! Tool Registry
//!
//! Holds the tools a dispatcher can call. Each entry pairs an immutable
//! [`ToolDefinition`] with the handler that implements it. Names are unique:
//! registering a name twice fails and leaves the registry untouched.
//!
//! Registration takes the write lock for the whole check-and-insert, so two
//! concurrent registrations of one name always end with exactly one winner.
//! After startup the registry is read-mostly; lookups only take the read lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::handler::ToolHandler;
use crate::schema::SchemaDescriptor;

/// Public description of a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,

    /// Description shown to the caller
    pub description: String,

    /// Argument schema
    #[serde(rename = "inputSchema")]
    pub input_schema: SchemaDescriptor,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: SchemaDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A definition bound to its handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: Arc<ToolDefinition>,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    /// Tools in registration order
    tools: Vec<RegisteredTool>,

    /// Index into `tools` by name
    by_name: HashMap<String, usize>,
}

/// The set of callable tools
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<RegistryInner>,
}

impl ToolRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool
    ///
    /// Fails with [`CoreError::DuplicateTool`] if the name is taken.
    pub fn register(
        &self,
        definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
    ) -> CoreResult<()> {
        let mut inner = self.inner.write();

        if inner.by_name.contains_key(&definition.name) {
            return Err(CoreError::DuplicateTool {
                name: definition.name,
            });
        }

        let idx = inner.tools.len();
        inner.by_name.insert(definition.name.clone(), idx);
        tracing::debug!("Registered tool: {}", definition.name);
        inner.tools.push(RegisteredTool {
            definition: Arc::new(definition),
            handler,
        });

        Ok(())
    }

    /// Look up a tool's definition
    pub fn get(&self, name: &str) -> CoreResult<ToolDefinition> {
        self.resolve(name).map(|tool| (*tool.definition).clone())
    }

    /// Look up a tool with its handler
    pub fn resolve(&self, name: &str) -> CoreResult<RegisteredTool> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|&idx| inner.tools[idx].clone())
            .ok_or_else(|| CoreError::ToolNotFound {
                name: name.to_string(),
            })
    }

    /// Snapshot of all definitions in registration order
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.inner
            .read()
            .tools
            .iter()
            .map(|tool| (*tool.definition).clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.read().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

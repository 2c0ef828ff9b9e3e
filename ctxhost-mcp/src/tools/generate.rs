//! Code generation tool
//!
//! The generator itself is an external collaborator behind [`CodeGenerator`].
//! The tool adds the conversation around it: prior context in, the new
//! exchange appended to the current session and saved.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use ctxhost_core::{
    FieldSpec, HandlerError, HandlerResult, SchemaDescriptor, SessionContextStore, ToolContext,
    ToolDefinition, ToolHandler,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;

/// Languages accepted by generate_code
pub const LANGUAGES: [&str; 9] = [
    "python",
    "javascript",
    "typescript",
    "java",
    "cpp",
    "go",
    "rust",
    "ruby",
    "php",
];

/// generate_code tool definition
pub fn generate_code_tool() -> ToolDefinition {
    ToolDefinition::new(
        "generate_code",
        "Generate code from a natural-language request. Earlier turns of the conversation are passed along as context.",
        SchemaDescriptor::new()
            .field(
                "prompt",
                FieldSpec::string()
                    .describe("What to generate, in natural language. e.g. 'a Python function for Fibonacci numbers'"),
            )
            .field(
                "language",
                FieldSpec::string()
                    .describe("Target language (optional)")
                    .one_of(LANGUAGES),
            )
            .field(
                "context_id",
                FieldSpec::string()
                    .describe("Session whose conversation should be used as context (optional)"),
            )
            .require("prompt"),
    )
}

/// Input for generate_code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateCodeInput {
    pub prompt: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub context_id: Option<String>,
}

/// What the generator is asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Rendered conversation context, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// What the generator returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub explanation: String,
}

/// External code generation capability
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    /// Produce code for a request
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedCode, HandlerError>;

    /// Generator name (for logging)
    fn name(&self) -> &str {
        "generator"
    }
}

/// Handler for generate_code
pub struct GenerateCodeTool {
    generator: Arc<dyn CodeGenerator>,
    store: Arc<SessionContextStore>,
}

impl GenerateCodeTool {
    pub fn new(generator: Arc<dyn CodeGenerator>, store: Arc<SessionContextStore>) -> Self {
        Self { generator, store }
    }

    /// Context for the request
    ///
    /// An explicit `context_id` wins; an unreadable one is ignored. Without
    /// it, or when it names the current session, the live window is used.
    async fn context_for(
        &self,
        context_id: Option<&str>,
        session_id: &str,
        current_window: String,
    ) -> Option<String> {
        let foreign = context_id.filter(|id| !id.is_empty() && *id != session_id);
        if let Some(id) = foreign {
            return match self
                .store
                .persisted_context(id, self.store.default_window())
                .await
            {
                Ok((window, _)) => Some(window).filter(|w| !w.is_empty()),
                Err(e) => {
                    tracing::debug!("Ignoring context_id {}: {}", id, e);
                    None
                }
            };
        }
        Some(current_window).filter(|w| !w.is_empty())
    }
}

#[async_trait]
impl ToolHandler for GenerateCodeTool {
    async fn invoke(&self, args: Value, context: ToolContext) -> HandlerResult {
        let input: GenerateCodeInput = serde_json::from_value(args)?;
        if input.prompt.trim().is_empty() {
            return Err("'prompt' must not be empty".into());
        }
        let session_id = context
            .session_id
            .ok_or("generate_code needs a current session")?;

        let request = GenerationRequest {
            prompt: input.prompt.clone(),
            language: input.language,
            context: self
                .context_for(input.context_id.as_deref(), &session_id, context.window)
                .await,
        };

        tracing::debug!("Generating code with {}", self.generator.name());
        let generated = self.generator.generate(request).await?;

        let mut metadata = serde_json::Map::new();
        metadata.insert("language".to_string(), json!(generated.language));
        metadata.insert("tool".to_string(), json!("generate_code"));
        self.store
            .add_interaction(&session_id, input.prompt, generated.code.clone(), Some(metadata))?;

        let saved_to = match self.store.save(&session_id).await {
            Ok(location) => Some(location),
            Err(e) => {
                tracing::warn!("Generated code kept in memory only: {}", e);
                None
            }
        };

        Ok(json!({
            "code": generated.code,
            "language": generated.language,
            "explanation": generated.explanation,
            "session_id": session_id,
            "saved_to": saved_to,
        }))
    }
}

/// Generator backed by an external program
///
/// The program receives a [`GenerationRequest`] as JSON on stdin and must
/// print a [`GeneratedCode`] JSON object on stdout.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl CodeGenerator for CommandGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<GeneratedCode, HandlerError> {
        let input = serde_json::to_vec(&request)?;

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to start {}: {}", self.program.display(), e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )
            .into());
        }

        let generated: GeneratedCode = serde_json::from_slice(&output.stdout)
            .map_err(|e| format!("generator printed invalid output: {}", e))?;
        Ok(generated)
    }

    fn name(&self) -> &str {
        self.program.to_str().unwrap_or("command")
    }
}

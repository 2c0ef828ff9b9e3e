//! ctxhost MCP Server Binary
//!
//! ## Usage
//!
//! ```bash
//! # Run as MCP server (stdio), sessions under ./context
//! ctxhost-mcp
//!
//! # Resume a session and enable generate_code through an external program
//! ctxhost-mcp --session 20260101_120000_abcd1234 --generator-command ./gen.sh
//!
//! # Keep sessions elsewhere
//! CTXHOST_CONTEXT_DIR=/var/lib/ctxhost ctxhost-mcp
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ctxhost_core::CoreConfig;
use ctxhost_mcp::{CommandGenerator, McpServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ctxhost-mcp")]
#[command(about = "Serve ctxhost tools and session context over MCP stdio")]
#[command(version)]
struct Args {
    /// Directory holding session records
    #[arg(long, env = "CTXHOST_CONTEXT_DIR")]
    context_dir: Option<PathBuf>,

    /// Resume this session (started fresh if it was never saved)
    #[arg(long)]
    session: Option<String>,

    /// Interactions included in a handler's context window
    #[arg(long)]
    context_window: Option<usize>,

    /// Upper bound on a single tool call, in milliseconds
    #[arg(long)]
    handler_timeout_ms: Option<u64>,

    /// Program that implements generate_code (request JSON on stdin)
    #[arg(long)]
    generator_command: Option<PathBuf>,

    /// Argument passed to the generator program (repeatable)
    #[arg(long = "generator-arg", requires = "generator_command")]
    generator_args: Vec<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "ctxhost_mcp=info,ctxhost_core=info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> CoreConfig {
        let mut builder = CoreConfig::builder();
        let base = CoreConfig::from_env();

        builder = builder
            .context_dir(self.context_dir.clone().unwrap_or(base.context_dir))
            .context_window(self.context_window.unwrap_or(base.context_window))
            .reply_char_budget(base.reply_char_budget);

        let timeout = self.handler_timeout_ms.or(base.handler_timeout_ms);
        if let Some(ms) = timeout {
            builder = builder.handler_timeout(Duration::from_millis(ms));
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the protocol
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting ctxhost MCP Server v{}", env!("CARGO_PKG_VERSION"));

    let config = args.config();
    let mut builder = McpServer::builder(config);

    if let Some(session) = &args.session {
        builder = builder.resume_session(session.clone());
    }
    if let Some(program) = &args.generator_command {
        tracing::info!("generate_code enabled via {}", program.display());
        builder = builder.generator(Arc::new(CommandGenerator::new(
            program.clone(),
            args.generator_args.clone(),
        )));
    }

    // A duplicate tool name fails here, before any request is read
    let server = Arc::new(builder.build().await?);

    tracing::info!(
        "MCP server ready on stdio (session {})",
        server.session_id()
    );
    server.run_stdio().await?;

    tracing::info!("Input closed, shutting down");
    Ok(())
}

//! pdb-dap - Debug Adapter Protocol bridge for Python's pdb
//!
//! Launched by the IDE; speaks DAP on stdin/stdout.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use pdb_dap::common::{config::Config, logging};
use pdb_dap::engine::LocalProcessEngine;
use pdb_dap::Result;

#[derive(Parser)]
#[command(name = "pdb-dap", about = "Debug adapter for Python's pdb")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Python interpreter to run the debug target with
    #[arg(long)]
    python: Option<PathBuf>,

    /// Workspace root; frames under it count as user code
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let guard = logging::init(cli.log_stderr);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?guard.path,
        "pdb-dap starting"
    );

    let result = run(cli).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Adapter failed");
    }
    drop(guard);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(python) = cli.python {
        config.python.path = Some(python);
    }

    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    tracing::info!(workspace = %workspace.display(), "Serving DAP on stdio");

    let engine = Arc::new(LocalProcessEngine::new(config.clone(), workspace));
    pdb_dap::dap::serve(tokio::io::stdin(), tokio::io::stdout(), config, engine).await
}

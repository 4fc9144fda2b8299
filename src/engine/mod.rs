//! Execution engines
//!
//! An engine hosts the debugged program: it starts the bootstrap script,
//! hands back the debugger's input and output channels, publishes the path
//! mapping for the session, and reports when the process exits.

mod process;

pub use process::LocalProcessEngine;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Notify};

use crate::common::Result;
use crate::mapping::MappingPublisher;
use crate::pdb::Bootstrap;

/// Everything an engine needs to start one debug session
pub struct EngineLaunch {
    /// Program as the IDE names it (workspace path)
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    /// Interpreter override from the launch request
    pub python: Option<PathBuf>,
    pub bootstrap: Bootstrap,
    /// Delivers the session's mount table; must be published exactly once
    pub mapping: MappingPublisher,
}

/// A running debug target
pub struct EngineProcess {
    /// Commands for pdb
    pub debugger_input: Box<dyn AsyncWrite + Send + Unpin>,
    /// pdb replies interleaved with program stdout
    pub debugger_output: Box<dyn AsyncRead + Send + Unpin>,
    /// Program stderr, if the engine separates it
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
    /// Resolves with the exit code once the process is gone
    pub exit: oneshot::Receiver<i32>,
    pub kill: KillHandle,
}

/// Requests teardown of an engine process
#[derive(Debug, Clone, Default)]
pub struct KillHandle {
    notify: Arc<Notify>,
}

impl KillHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the engine to stop the process; safe to call repeatedly
    pub fn kill(&self) {
        self.notify.notify_one();
    }

    /// Completes once [`KillHandle::kill`] has been called
    pub async fn killed(&self) {
        self.notify.notified().await;
    }
}

/// Hosts debug targets
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn launch(&self, launch: EngineLaunch) -> Result<EngineProcess>;
}

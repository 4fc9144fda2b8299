//! Local execution engine: runs the bootstrap under a host Python interpreter

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::common::config::Config;
use crate::common::paths::{has_prefix, normalize};
use crate::common::{Error, Result};
use crate::mapping::{Mount, MountTable};

use super::{EngineLaunch, EngineProcess, ExecutionEngine, KillHandle};

/// Runs `python -u -c <bootstrap>` on the host
///
/// Host and "sandbox" paths coincide, so the mount table maps the workspace
/// to itself and exists mainly to classify user code.
pub struct LocalProcessEngine {
    config: Config,
    workspace: PathBuf,
}

impl LocalProcessEngine {
    pub fn new(config: Config, workspace: PathBuf) -> Self {
        Self { config, workspace }
    }

    /// Mounts for one launch: the workspace, configured extras, and the
    /// program's own directory when it lies outside the workspace
    fn mount_table(&self, program: &str) -> MountTable {
        let workspace = normalize(&self.workspace.to_string_lossy());
        let mut mounts = vec![Mount::new(&workspace, &workspace, true)];

        mounts.extend(
            self.config
                .mounts
                .iter()
                .map(|m| Mount::new(&m.sandbox, &m.workspace, m.user_code)),
        );

        let program_dir = Path::new(program)
            .parent()
            .map(|p| normalize(&p.to_string_lossy()))
            .filter(|dir| !dir.is_empty());
        if let Some(dir) = program_dir {
            if !mounts.iter().any(|m| has_prefix(&dir, &m.workspace)) {
                mounts.push(Mount::new(&dir, &dir, true));
            }
        }

        MountTable::new(mounts)
    }
}

#[async_trait]
impl ExecutionEngine for LocalProcessEngine {
    async fn launch(&self, launch: EngineLaunch) -> Result<EngineProcess> {
        let python = self.config.python_executable(launch.python.as_deref())?;
        let table = self.mount_table(&launch.program);
        let program = table.to_sandbox(&launch.program);
        let script = launch.bootstrap.render(&program, &launch.args)?;
        let cwd = launch.cwd.clone().unwrap_or_else(|| self.workspace.clone());

        tracing::info!(
            python = %python.display(),
            program = %program,
            cwd = %cwd.display(),
            "Starting debug target"
        );

        let mut cmd = Command::new(&python);
        cmd.arg("-u")
            .arg("-c")
            .arg(script)
            .current_dir(&cwd)
            .envs(&launch.env)
            .env("PYTHONIOENCODING", "utf-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::EngineStartFailed(format!("Failed to start {}: {}", python.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EngineStartFailed("Failed to get python stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EngineStartFailed("Failed to get python stdout".to_string()))?;
        let stderr = child.stderr.take();

        launch.mapping.publish(table);

        let kill = KillHandle::new();
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(watch_child(child, kill.clone(), exit_tx));

        Ok(EngineProcess {
            debugger_input: Box::new(stdin),
            debugger_output: Box::new(stdout),
            stderr: stderr.map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>),
            exit: exit_rx,
            kill,
        })
    }
}

/// Wait for the child to exit, killing it first if asked to
async fn watch_child(mut child: Child, kill: KillHandle, exit: oneshot::Sender<i32>) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.killed() => {
            tracing::debug!("Killing debug target");
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "Failed to kill debug target");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to wait for debug target");
            -1
        }
    };
    tracing::info!(exit_code = code, "Debug target exited");
    let _ = exit.send(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::MountConfig;

    #[test]
    fn test_mount_table_covers_workspace_and_config() {
        let mut config = Config::default();
        config.mounts.push(MountConfig {
            sandbox: "/site".to_string(),
            workspace: "/home/dev/.venv/site".to_string(),
            user_code: false,
        });
        let engine = LocalProcessEngine::new(config, PathBuf::from("/home/dev/project/"));

        let table = engine.mount_table("/home/dev/project/app.py");
        assert_eq!(table.mounts().len(), 2);
        assert!(table.is_user_code("/home/dev/project/pkg/mod.py"));
        assert!(!table.is_user_code("/site/requests/api.py"));
        assert_eq!(table.to_sandbox("/home/dev/project/app.py"), "/home/dev/project/app.py");
    }

    #[test]
    fn test_loose_program_directory_is_user_code() {
        let engine = LocalProcessEngine::new(Config::default(), PathBuf::from("/home/dev/project"));
        let table = engine.mount_table("/tmp/scratch/try.py");
        assert!(table.is_user_code("/tmp/scratch/try.py"));
        assert!(!table.is_user_code("/usr/lib/python3.12/os.py"));
    }
}

//! Path translation between the execution sandbox and the IDE workspace
//!
//! The execution engine publishes a mount table once per session. Until it
//! arrives, translations wait (bounded by the configured timeout) instead of
//! failing, so requests issued right after launch queue transparently.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::common::paths::{has_prefix, normalize};
use crate::common::{Error, Result};

/// One sandbox prefix mapped to a workspace location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub sandbox: String,
    pub workspace: String,
    /// Frames under this mount are "my code" and may be stopped in
    pub user_code: bool,
}

impl Mount {
    pub fn new(sandbox: &str, workspace: &str, user_code: bool) -> Self {
        Self {
            sandbox: normalize(sandbox),
            workspace: normalize(workspace),
            user_code,
        }
    }
}

/// Mount table for one session; replaced wholesale, never patched
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    mounts: Vec<Mount>,
}

impl MountTable {
    pub fn new(mounts: impl IntoIterator<Item = Mount>) -> Self {
        Self {
            mounts: mounts
                .into_iter()
                .map(|m| Mount::new(&m.sandbox, &m.workspace, m.user_code))
                .collect(),
        }
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Mount with the longest prefix containing `path` on the chosen side
    fn longest_match(&self, path: &str, side: fn(&Mount) -> &str) -> Option<&Mount> {
        self.mounts
            .iter()
            .filter(|m| has_prefix(path, side(m)))
            .max_by_key(|m| side(m).len())
    }

    /// Translate a path seen by the debugged program into a workspace path
    ///
    /// Paths outside every mount come back normalized but otherwise unchanged.
    pub fn to_workspace(&self, sandbox_path: &str) -> String {
        let path = normalize(sandbox_path);
        match self.longest_match(&path, |m| &m.sandbox) {
            Some(mount) => rebase(&path, &mount.sandbox, &mount.workspace),
            None => path,
        }
    }

    /// Translate a workspace path into the path the debugged program sees
    pub fn to_sandbox(&self, workspace_path: &str) -> String {
        let path = normalize(workspace_path);
        match self.longest_match(&path, |m| &m.workspace) {
            Some(mount) => rebase(&path, &mount.workspace, &mount.sandbox),
            None => path,
        }
    }

    /// Whether a sandbox path belongs to user code
    pub fn is_user_code(&self, sandbox_path: &str) -> bool {
        let path = normalize(sandbox_path);
        self.longest_match(&path, |m| &m.sandbox)
            .map(|m| m.user_code)
            .unwrap_or(false)
    }
}

/// Replace the `from` prefix of `path` with `to`
fn rebase(path: &str, from: &str, to: &str) -> String {
    let rest = path[from.len()..].trim_start_matches('/');
    if rest.is_empty() {
        to.to_string()
    } else if to.ends_with('/') {
        format!("{to}{rest}")
    } else {
        format!("{to}/{rest}")
    }
}

/// Create the one-shot mapping notification for a session
pub fn channel(timeout: Duration) -> (MappingPublisher, PathTranslator) {
    let (tx, rx) = watch::channel(None);
    (MappingPublisher { tx }, PathTranslator { rx, timeout })
}

/// Engine side of the mapping notification
#[derive(Debug)]
pub struct MappingPublisher {
    tx: watch::Sender<Option<Arc<MountTable>>>,
}

impl MappingPublisher {
    pub fn publish(&self, table: MountTable) {
        tracing::debug!(mounts = ?table.mounts(), "Path mapping published");
        self.tx.send_replace(Some(Arc::new(table)));
    }
}

/// Session side: translations that wait for the mount table
#[derive(Debug, Clone)]
pub struct PathTranslator {
    rx: watch::Receiver<Option<Arc<MountTable>>>,
    timeout: Duration,
}

impl PathTranslator {
    /// The mount table, waiting for it to be published if necessary
    async fn table(&self) -> Result<Arc<MountTable>> {
        let mut rx = self.rx.clone();
        let waited = tokio::time::timeout(self.timeout, rx.wait_for(Option::is_some))
            .await
            .map(|r| r.map(|table| table.clone()));

        match waited {
            Ok(Ok(Some(table))) => Ok(table),
            Ok(Ok(None)) => Err(Error::Internal("mapping channel yielded no table".to_string())),
            Ok(Err(_)) => Err(Error::Internal(
                "execution engine closed before publishing the path mapping".to_string(),
            )),
            Err(_) => Err(Error::MappingTimeout(self.timeout.as_secs())),
        }
    }

    pub async fn to_workspace_path(&self, sandbox_path: &str) -> Result<String> {
        Ok(self.table().await?.to_workspace(sandbox_path))
    }

    pub async fn to_sandbox_path(&self, workspace_path: &str) -> Result<String> {
        Ok(self.table().await?.to_sandbox(workspace_path))
    }

    pub async fn is_user_code(&self, sandbox_path: &str) -> Result<bool> {
        Ok(self.table().await?.is_user_code(sandbox_path))
    }
}

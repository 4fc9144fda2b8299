//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Default prompt string the bootstrap installs on the debugger
pub const DEFAULT_PROMPT_TERMINATOR: &str = "\u{1e}(pdb-dap)\u{1e}";

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Python interpreter settings
    #[serde(default)]
    pub python: PythonConfig,

    /// Debugger protocol settings
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Extra mounts exposed by the local engine
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

/// Python interpreter settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PythonConfig {
    /// Interpreter path; searched on PATH when absent
    pub path: Option<PathBuf>,
}

/// Debugger protocol settings
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggerConfig {
    /// Prompt string that terminates every debugger reply
    #[serde(default = "default_prompt_terminator")]
    pub prompt_terminator: String,

    /// Upper bound on transparent steps taken for a single run command
    #[serde(default = "default_max_auto_steps")]
    pub max_auto_steps: usize,

    /// Hide `<string>`, bdb and pdb frames from stack traces
    #[serde(default = "default_true")]
    pub hide_internal_frames: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            prompt_terminator: default_prompt_terminator(),
            max_auto_steps: default_max_auto_steps(),
            hide_internal_frames: true,
        }
    }
}

fn default_prompt_terminator() -> String {
    DEFAULT_PROMPT_TERMINATOR.to_string()
}

fn default_max_auto_steps() -> usize {
    500
}

fn default_true() -> bool {
    true
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// How long path translation waits for the engine's mount table
    #[serde(default = "default_mapping")]
    pub mapping_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            mapping_secs: default_mapping(),
        }
    }
}

fn default_mapping() -> u64 {
    30
}

/// A mount entry for the local engine
#[derive(Debug, Deserialize, Clone)]
pub struct MountConfig {
    /// Path prefix as seen by the debugged program
    pub sandbox: String,
    /// Workspace location the prefix maps to
    pub workspace: String,
    /// Whether frames under this mount count as user code
    #[serde(default)]
    pub user_code: bool,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the Python interpreter to run
    ///
    /// An explicit override wins, then the config file, then PATH.
    pub fn python_executable(&self, override_path: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = override_path.or(self.python.path.as_deref()) {
            return Ok(path.to_path_buf());
        }

        let candidates = ["python3", "python"];
        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .ok_or_else(|| Error::PythonNotFound(candidates.join(", ")))
    }
}

//! Error types for the pdb bridge
//!
//! Errors never cross the DAP boundary as panics: every handler failure is
//! rendered into a failed response with [`Error::dap_message`].

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the bridge
#[derive(Error, Debug)]
pub enum Error {
    // === DAP Protocol Errors ===
    #[error("DAP protocol error: {0}")]
    DapProtocol(String),

    #[error("Unhandled request {0}")]
    UnknownRequest(String),

    #[error("Invalid arguments for '{command}': {reason}")]
    InvalidArguments { command: String, reason: String },

    // === Session Errors ===
    #[error("No debug session active. Send 'launch' first")]
    SessionNotActive,

    #[error("Debug session already launched")]
    SessionAlreadyActive,

    #[error("Cannot {action} while session is {state}")]
    InvalidState { action: String, state: String },

    #[error("Frame {0} not found")]
    FrameNotFound(usize),

    // === Debugger / Engine Errors ===
    #[error("Debugger exited before replying")]
    DebuggerExited,

    #[error("Debugger rejected '{command}': {message}")]
    DebuggerError { command: String, message: String },

    #[error("Execution engine failed to start: {0}")]
    EngineStartFailed(String),

    #[error("Python interpreter not found. Searched: {0}")]
    PythonNotFound(String),

    #[error("Path mapping not received after {0} seconds")]
    MappingTimeout(u64),

    // === Configuration Errors ===
    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(command: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArguments {
            command: command.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a debugger error from a `*** ...` reply
    pub fn debugger_error(command: &str, message: &str) -> Self {
        Self::DebuggerError {
            command: command.to_string(),
            message: message.trim().to_string(),
        }
    }

    /// Text placed in the `message` field of a failed DAP response
    pub fn dap_message(&self) -> String {
        self.to_string()
    }

    /// Whether this error means the debugger is gone for good
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DebuggerExited | Self::EngineStartFailed(_))
    }
}

//! pdb-dap: a Debug Adapter Protocol bridge for Python's pdb
//!
//! Drives pdb through its textual prompt protocol and re-exposes it to an
//! IDE as a DAP debug adapter over stdio.

pub mod adapter;
pub mod common;
pub mod dap;
pub mod engine;
pub mod mapping;
pub mod pdb;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};

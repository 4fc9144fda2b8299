//! Debug Adapter Protocol (DAP), adapter side
//!
//! Framing, message types, and the stdio server that feeds requests to the
//! protocol adapter.

pub mod codec;
pub mod server;
pub mod types;

pub use server::{serve, Outbound};
pub use types::*;

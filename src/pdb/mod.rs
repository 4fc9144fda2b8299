//! pdb textual protocol
//!
//! The debugger channel, the parsers for its replies, and the launcher
//! script that puts the target program under pdb.

pub mod bootstrap;
pub mod demux;
pub mod parser;

pub use bootstrap::Bootstrap;
pub use demux::{Demux, PendingReply, ReadMode, RunMode};

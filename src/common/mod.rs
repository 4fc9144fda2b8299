//! Common utilities shared by the adapter components

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod text;

pub use error::{Error, Result};

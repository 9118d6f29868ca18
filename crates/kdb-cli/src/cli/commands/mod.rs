//! CLI command handlers.

pub mod config;
pub mod quota;
pub mod render;
pub mod replay;

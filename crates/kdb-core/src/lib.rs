//! Core kdb library (rendering, rate limiting, streaming, config).

pub mod config;
pub mod interrupt;
pub mod logging;
pub mod markdown;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod stream;

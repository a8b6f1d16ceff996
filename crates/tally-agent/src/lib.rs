//! tally agent library entry.
//!
//! Hosts the aggregation core: strict config loading, startup registration,
//! the HTTP request instrumentation surface, and the periodic export loop. It
//! is consumed by the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod export;
pub mod http;

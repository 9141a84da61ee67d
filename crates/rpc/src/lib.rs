//! EDA-Lab RPC - CLI orchestrator
//!
//! Loads configuration, wires the pipeline together and runs the CLI
//! commands on top of it.

pub mod commands;
pub mod config;
pub mod context;

pub use config::{AppConfig, ConfigError, LedgerStorage};
pub use context::AppContext;

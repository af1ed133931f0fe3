//! code-sandbox library
//!
//! Runs untrusted python, javascript and bash snippets as child processes:
//! - Denylist validation before anything is spawned
//! - Per-language executors with scrubbed environments and timeouts
//! - An execution manager that detects the language and dispatches
//! - MCP server implementation using rmcp

pub mod config;
pub mod detect;
pub mod executor;
pub mod manager;
pub mod mcp;
pub mod result;
pub mod security;

pub use detect::{detect_language, normalize_language};
pub use executor::LanguageExecutor;
pub use manager::{ExecuteRequest, ExecutionManager};
pub use result::{ExecutionResult, ExecutionStatus};
pub use security::Violation;

//! CDE Orchestrator server library.
//!
//! Exposed as a library so integration tests can drive the tool surface
//! without a child process.

pub mod config;
pub mod stdio;
pub mod tasks;
pub mod telemetry;
pub mod tools;

pub use config::Config;
pub use stdio::StdioServer;
pub use tasks::{TaskRegistry, TaskStatus};
pub use tools::{ToolServer, TOOL_CATALOG};

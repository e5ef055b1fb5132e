//! caseflow - case workflow runner
//!
//! Executes task trees ("cases") as ordered sequences of external
//! processes, and queues cases for priority ordered execution in worker
//! processes that a master controls over JSON-RPC.

pub mod config;
pub mod core;
pub mod document;
pub mod error;
pub mod queue;
pub mod rpc;
pub mod tasks;

// Re-exports
pub use config::Configuration;
pub use core::{Context, Engine, Node, Pipeline, RunOutcome, Task, TaskRegistry, TaskSpec};
pub use document::CaseDocument;
pub use error::{ConfigError, ControlError, TaskError, ABORTED_EXIT_CODE, FAILED_EXIT_CODE};
pub use queue::{JobQueue, JobState, QueueSettings};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;

//! Core engine - task tree, context, registry and pipeline execution

mod context;
mod control;
mod node;
mod pipeline;
mod process;
mod registry;
mod task;

pub use context::{placeholders, Context};
pub use control::{ActiveGuard, RunControl};
pub use node::{Node, RenderScope};
pub use pipeline::{Engine, Pipeline, RunOutcome, WorkingDir};
pub use process::ProcessSlot;
pub use registry::{Registration, TaskFactory, TaskRegistry};
pub use task::{Task, TaskInfo, TaskSpec};

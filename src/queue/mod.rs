//! Job queue - priority ordered, one job at a time, each in its own worker process

mod job;
mod scheduler;

pub use job::{Job, JobId, JobState, JobSummary};
pub use scheduler::{JobQueue, QueueSettings};

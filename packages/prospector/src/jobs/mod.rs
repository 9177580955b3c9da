//! Job orchestration: live handles, the scheduler and startup recovery.

mod handle;
pub mod recovery;
mod scheduler;

pub use handle::{JobHandle, JobSnapshot, LogEntry};
pub use scheduler::{JobScheduler, PipelineDeps, SchedulerConfig, StartJobError};

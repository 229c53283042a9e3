//! Background job scheduling and execution system.
//!
//! Jobs run as tokio tasks bounded by a semaphore, observe a shared
//! cancellation token and report their runs through a [`SchedulerHandle`].

mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use handle::{JobInfo, JobRun, JobRunStatus, SchedulerHandle, SharedJobState};
pub use job::{BackgroundJob, JobError, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};

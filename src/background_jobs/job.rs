use super::context::JobContext;
use async_trait::async_trait;
use thiserror::Error;

/// How a job should be handled during server shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job not found")]
    NotFound,
    #[error("Job is already running")]
    AlreadyRunning,
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Job was cancelled")]
    Cancelled,
}

/// Trait for background jobs.
///
/// Jobs run as tokio tasks. Long-running work should check
/// `ctx.is_cancelled()` between steps and return `JobError::Cancelled`.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Unique identifier for this job.
    fn id(&self) -> &str;

    /// Human-readable name for this job.
    fn name(&self) -> &str;

    /// Description of what this job does.
    fn description(&self) -> &str;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Called instead of `execute` when the job is cancelled while still
    /// waiting for a slot.
    fn cancelled_before_start(&self) {}

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}

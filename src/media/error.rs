use crate::process::ProcessError;
use thiserror::Error;

/// Failure of a request-time media operation. Each variant maps to its own
/// HTTP status.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("No candidate track available: {0}")]
    NoCandidateAvailable(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Compose failed: {0}")]
    ComposeFailed(String),

    #[error("Failed to launch {program}: {message}")]
    ProcessLaunchFailed { program: String, message: String },

    #[error("{program} failed: {message}")]
    ProcessFailed { program: String, message: String },

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    /// Stable machine-readable name, used in responses and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::BadInput(_) => "bad_input",
            PipelineError::NoCandidateAvailable(_) => "no_candidate_available",
            PipelineError::TranscodeFailed(_) => "transcode_failed",
            PipelineError::ComposeFailed(_) => "compose_failed",
            PipelineError::ProcessLaunchFailed { .. } => "process_launch_failed",
            PipelineError::ProcessFailed { .. } => "process_failed",
            PipelineError::UserNotFound(_) => "user_not_found",
            PipelineError::ShuttingDown => "shutting_down",
            PipelineError::Io(_) => "io",
            PipelineError::Store(_) => "store",
        }
    }
}

impl From<ProcessError> for PipelineError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::LaunchFailed { program, source } => PipelineError::ProcessLaunchFailed {
                program,
                message: source.to_string(),
            },
            ProcessError::Failed { .. } => PipelineError::ProcessFailed {
                program: err.program().to_string(),
                message: err.to_string(),
            },
            ProcessError::Cancelled { .. } => PipelineError::ShuttingDown,
        }
    }
}

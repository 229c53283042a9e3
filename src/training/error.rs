use crate::corpus::{UnitFailure, UnitFailureKind};
use crate::process::ProcessError;
use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStep {
    Train,
    Generate,
}

impl TrainingStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStep::Train => "train",
            TrainingStep::Generate => "generate",
        }
    }
}

impl fmt::Display for TrainingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one unit's orchestration pass stopped.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error("{step} step: {source}")]
    Process {
        step: TrainingStep,
        #[source]
        source: ProcessError,
    },

    #[error("trainer exited successfully but {0:?} does not exist")]
    MissingRunDir(PathBuf),

    #[error("failed to inspect track pool: {0}")]
    Probe(#[from] std::io::Error),
}

impl UnitError {
    pub fn process(step: TrainingStep, source: ProcessError) -> Self {
        UnitError::Process { step, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            UnitError::Process {
                source: ProcessError::Cancelled { .. },
                ..
            }
        )
    }

    /// A launch failure means the tool is missing or broken, running the
    /// pass again will not help. Everything else may succeed next time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            UnitError::Process {
                source: ProcessError::LaunchFailed { .. },
                ..
            }
        )
    }

    pub fn kind(&self) -> UnitFailureKind {
        match self {
            UnitError::Process { source, .. } => match source {
                ProcessError::LaunchFailed { .. } => UnitFailureKind::ProcessLaunchFailed,
                ProcessError::Failed { .. } => UnitFailureKind::ProcessFailed,
                ProcessError::Cancelled { .. } => UnitFailureKind::Cancelled,
            },
            UnitError::MissingRunDir(_) => UnitFailureKind::ProcessFailed,
            UnitError::Probe(_) => UnitFailureKind::Probe,
        }
    }

    pub fn to_failure(&self) -> UnitFailure {
        UnitFailure {
            kind: self.kind(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            at: Utc::now(),
        }
    }
}

use crate::process::ProcessRunner;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to jobs during execution.
#[derive(Clone)]
pub struct JobContext {
    /// Token to check for cancellation/shutdown requests.
    pub cancellation_token: CancellationToken,

    /// Runs the external programs jobs depend on.
    pub runner: Arc<dyn ProcessRunner>,
}

impl JobContext {
    pub fn new(cancellation_token: CancellationToken, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            cancellation_token,
            runner,
        }
    }

    /// Same shared resources, different cancellation scope.
    pub fn with_token(&self, cancellation_token: CancellationToken) -> Self {
        Self {
            cancellation_token,
            runner: Arc::clone(&self.runner),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

//! Personality image rendering.

use super::composer::IMAGE_EXTENSION;
use super::PipelineError;
use crate::process::{CommandSpec, ProcessRunner};
use crate::server::metrics;
use crate::user::UserRecord;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[async_trait]
pub trait ImageRenderer: Send + Sync {
    /// Renders the image of `record`, keyed by its track token. `None` when
    /// this renderer produces nothing.
    async fn render(
        &self,
        record: &UserRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, PipelineError>;
}

/// Used when no renderer program is configured.
pub struct NoopImageRenderer;

#[async_trait]
impl ImageRenderer for NoopImageRenderer {
    async fn render(
        &self,
        record: &UserRecord,
        _cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, PipelineError> {
        debug!("No image renderer configured, skipping {}", record.user_id);
        Ok(None)
    }
}

/// Runs `<program> <output.png> <o> <c> <e> <a> <n>`.
pub struct CommandImageRenderer {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    image_dir: PathBuf,
}

impl CommandImageRenderer {
    pub fn new(runner: Arc<dyn ProcessRunner>, program: String, image_dir: PathBuf) -> Self {
        Self {
            runner,
            program,
            image_dir,
        }
    }
}

#[async_trait]
impl ImageRenderer for CommandImageRenderer {
    async fn render(
        &self,
        record: &UserRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<PathBuf>, PipelineError> {
        tokio::fs::create_dir_all(&self.image_dir).await?;
        let output = self
            .image_dir
            .join(format!("{}.{}", record.track_file, IMAGE_EXTENSION));

        let spec = CommandSpec::new(&self.program)
            .path_arg(&output)
            .args(record.personality().as_array().iter().map(|v| v.to_string()));
        let result = self
            .runner
            .run(&spec, cancel)
            .await
            .and_then(|out| out.ensure_success());
        match result {
            Ok(_) => {}
            Err(e) => {
                metrics::record_process_invocation("render", "failed");
                return Err(e.into());
            }
        }
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            metrics::record_process_invocation("render", "failed");
            return Err(PipelineError::ProcessFailed {
                program: self.program.clone(),
                message: format!("no image written to {:?}", output),
            });
        }

        metrics::record_process_invocation("render", "success");
        Ok(Some(output))
    }
}

//! Muxes a user's image and track into a short-lived video.

use super::deletion::DeletionScheduler;
use super::transcoder::TRACK_EXTENSION;
use super::PipelineError;
use crate::process::{CommandSpec, ProcessRunner};
use crate::server::metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const MULTIPLEXER: &str = "ffmpeg";
pub const IMAGE_EXTENSION: &str = "png";
pub const VIDEO_EXTENSION: &str = "mp4";

/// Where a token's inputs and output live.
#[derive(Debug, Clone)]
pub struct ComposerPaths {
    pub image_dir: PathBuf,
    pub music_dir: PathBuf,
    pub video_dir: PathBuf,
}

pub struct VideoComposer {
    runner: Arc<dyn ProcessRunner>,
    paths: ComposerPaths,
    video_ttl: Duration,
    relax_permissions: bool,
    deletions: DeletionScheduler,
}

impl VideoComposer {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        paths: ComposerPaths,
        video_ttl: Duration,
        relax_permissions: bool,
        deletions: DeletionScheduler,
    ) -> Self {
        Self {
            runner,
            paths,
            video_ttl,
            relax_permissions,
            deletions,
        }
    }

    /// A token names files in three stores, so it must be one plain path
    /// segment.
    pub fn validate_token(token: &str) -> Result<(), PipelineError> {
        let valid = !token.is_empty()
            && token != "."
            && token != ".."
            && !token.contains(['/', '\\', '\0']);
        if valid {
            Ok(())
        } else {
            Err(PipelineError::BadInput(format!(
                "{:?} is not a valid file token",
                token
            )))
        }
    }

    pub fn image_path(&self, token: &str) -> PathBuf {
        self.paths
            .image_dir
            .join(format!("{}.{}", token, IMAGE_EXTENSION))
    }

    pub fn music_path(&self, token: &str) -> PathBuf {
        self.paths
            .music_dir
            .join(format!("{}.{}", token, TRACK_EXTENSION))
    }

    pub fn video_path(&self, token: &str) -> PathBuf {
        self.paths
            .video_dir
            .join(format!("{}.{}", token, VIDEO_EXTENSION))
    }

    fn command(&self, image: &Path, music: &Path, video: &Path) -> CommandSpec {
        CommandSpec::new(MULTIPLEXER)
            .arg("-i")
            .path_arg(image)
            .arg("-i")
            .path_arg(music)
            .args(["-strict", "-2", "-c:v", "libx264", "-pix_fmt", "yuv420p"])
            .path_arg(video)
            .arg("-y")
    }

    /// Produces `<video_dir>/<token>.mp4` and schedules its deletion.
    pub async fn compose(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        Self::validate_token(token)?;
        let image = self.image_path(token);
        let music = self.music_path(token);
        let video = self.video_path(token);

        for input in [&image, &music] {
            if !tokio::fs::try_exists(input).await.unwrap_or(false) {
                metrics::record_process_invocation("compose", "missing_input");
                return Err(PipelineError::ComposeFailed(format!(
                    "input {:?} does not exist",
                    input
                )));
            }
        }
        tokio::fs::create_dir_all(&self.paths.video_dir).await?;

        debug!("Composing video for {}", token);
        let spec = self.command(&image, &music, &video);
        let output = match self.runner.run(&spec, cancel).await {
            Ok(output) => output,
            Err(e) => {
                metrics::record_process_invocation("compose", "launch_failed");
                return Err(e.into());
            }
        };
        if !output.success() {
            metrics::record_process_invocation("compose", "failed");
            return Err(PipelineError::ComposeFailed(format!(
                "{} exited with {:?}: {}",
                MULTIPLEXER, output.exit_code, output.stderr
            )));
        }
        if !tokio::fs::try_exists(&video).await.unwrap_or(false) {
            metrics::record_process_invocation("compose", "failed");
            return Err(PipelineError::ComposeFailed(format!(
                "{} produced no {:?}",
                MULTIPLEXER, video
            )));
        }
        metrics::record_process_invocation("compose", "success");

        self.deletions.schedule(video.clone(), self.video_ttl);
        if self.relax_permissions {
            let dir = self.paths.video_dir.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || relax_permissions(&dir)).await {
                warn!("Permission relaxation task failed: {}", e);
            }
        }

        info!(
            "Composed {:?}, deleting it in {}s",
            video,
            self.video_ttl.as_secs()
        );
        Ok(video)
    }
}

/// Recursively opens up `dir` to everyone. Safe to run concurrently, every
/// run sets the same mode. Returns how many entries could not be changed.
pub fn relax_permissions(dir: &Path) -> usize {
    let mut failures = 0;
    for entry in WalkDir::new(dir) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                // Files may vanish under us when a deletion fires.
                debug!("Skipping entry while relaxing permissions: {}", e);
                continue;
            }
        };
        if let Err(e) = set_open_mode(entry.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to relax permissions on {:?}: {}", entry.path(), e);
                failures += 1;
            }
        }
    }
    failures
}

#[cfg(unix)]
fn set_open_mode(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777))
}

#[cfg(not(unix))]
fn set_open_mode(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ArgSlot, SimulatedEffect, SimulatedFailure, SimulatedProcessRunner};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        runner: Arc<SimulatedProcessRunner>,
        deletions: DeletionScheduler,
        composer: VideoComposer,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(
            SimulatedProcessRunner::new()
                .with_effect(MULTIPLEXER, SimulatedEffect::WriteFileAt(ArgSlot::FromEnd(1))),
        );
        let deletions = DeletionScheduler::new(&CancellationToken::new());
        let paths = ComposerPaths {
            image_dir: dir.path().join("images"),
            music_dir: dir.path().join("music"),
            video_dir: dir.path().join("videos"),
        };
        std::fs::create_dir_all(&paths.image_dir).unwrap();
        std::fs::create_dir_all(&paths.music_dir).unwrap();
        let composer = VideoComposer::new(
            runner.clone(),
            paths,
            Duration::from_secs(600),
            true,
            deletions.clone(),
        );
        Fixture {
            dir,
            runner,
            deletions,
            composer,
        }
    }

    fn inputs(f: &Fixture, token: &str) {
        std::fs::write(f.composer.image_path(token), b"png").unwrap();
        std::fs::write(f.composer.music_path(token), b"mp3").unwrap();
    }

    #[test]
    fn tokens_must_be_single_segments() {
        assert!(VideoComposer::validate_token("97_alice").is_ok());
        for bad in ["", ".", "..", "a/b", "../etc", "a\\b"] {
            assert!(
                matches!(
                    VideoComposer::validate_token(bad),
                    Err(PipelineError::BadInput(_))
                ),
                "{:?} accepted",
                bad
            );
        }
    }

    #[tokio::test]
    async fn compose_runs_multiplexer_and_schedules_deletion() {
        let f = fixture();
        inputs(&f, "97_alice");

        let video = f
            .composer
            .compose("97_alice", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(video, f.dir.path().join("videos/97_alice.mp4"));
        assert!(video.exists());
        assert!(f.deletions.is_pending(&video));

        let spec = &f.runner.invocations()[0];
        assert_eq!(spec.program, "ffmpeg");
        assert_eq!(spec.args.first().map(String::as_str), Some("-i"));
        assert_eq!(spec.args.last().map(String::as_str), Some("-y"));
        assert!(spec.args.contains(&"libx264".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compose_opens_up_video_directory() {
        use std::os::unix::fs::PermissionsExt;
        let f = fixture();
        inputs(&f, "97_alice");

        let video = f
            .composer
            .compose("97_alice", &CancellationToken::new())
            .await
            .unwrap();

        let mode = std::fs::metadata(&video).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o777);
    }

    #[tokio::test]
    async fn multiplexer_failure_is_compose_failed() {
        let f = fixture();
        inputs(&f, "97_alice");
        f.runner.fail(MULTIPLEXER, SimulatedFailure::Exit(1));

        let result = f
            .composer
            .compose("97_alice", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::ComposeFailed(_))));
        assert_eq!(f.deletions.pending_count(), 0);
    }

    #[tokio::test]
    async fn missing_inputs_skip_the_multiplexer() {
        let f = fixture();

        let result = f
            .composer
            .compose("nobody", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::ComposeFailed(_))));
        assert!(f.runner.invocations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_videos_exist_until_their_ttl_elapses() {
        let f = fixture();
        inputs(&f, "97_alice");
        inputs(&f, "98_bob");
        let cancel = CancellationToken::new();

        let (first, second) = tokio::join!(
            f.composer.compose("97_alice", &cancel),
            f.composer.compose("98_bob", &cancel),
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert!(first.exists());
        assert!(second.exists());
        assert_eq!(f.deletions.pending_count(), 2);

        tokio::time::sleep(Duration::from_secs(599)).await;
        assert!(first.exists());
        assert!(second.exists());

        tokio::time::sleep(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert!(!first.exists());
        assert!(!second.exists());
        assert_eq!(f.deletions.pending_count(), 0);
    }

    #[test]
    fn relax_permissions_tolerates_missing_directory() {
        let dir = TempDir::new().unwrap();
        assert_eq!(relax_permissions(&dir.path().join("absent")), 0);
    }
}

//! MIDI to MP3 conversion through timidity and lame.

use super::PipelineError;
use crate::process::{CommandSpec, ProcessRunner};
use crate::server::metrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const TRANSCODE_SHELL: &str = "bash";

/// Paths and bitrate arrive as positional parameters, never inside the script.
const TRANSCODE_SCRIPT: &str = r#"set -o pipefail; timidity "$1" -Ow -o - | lame - -b "$2" "$3""#;

pub const TRACK_EXTENSION: &str = "mp3";

/// `String.hashCode` as computed by the JVM: `31 * h + c` over UTF-16 code
/// units, wrapping at 32 bits. Keeps track names compatible with existing
/// music stores.
pub fn java_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// File stem shared by a user's track, image and video.
pub fn track_token(user_id: &str, user_name: &str) -> String {
    format!("{}_{}", java_hash(user_id), user_name)
}

#[derive(Debug)]
pub enum TranscodeOutcome {
    Transcoded(PathBuf),
    /// The toolchain failed, the user gets the untouched source track.
    Degraded {
        source: PathBuf,
        error: PipelineError,
    },
}

impl TranscodeOutcome {
    pub fn path(&self) -> &Path {
        match self {
            TranscodeOutcome::Transcoded(path) => path,
            TranscodeOutcome::Degraded { source, .. } => source,
        }
    }

    /// Track reference stored in the user record: the file name without
    /// its extension.
    pub fn track_file(&self) -> String {
        self.path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, TranscodeOutcome::Degraded { .. })
    }
}

pub struct AudioTranscoder {
    runner: Arc<dyn ProcessRunner>,
    store_dir: PathBuf,
    bitrate_kbps: u32,
}

impl AudioTranscoder {
    pub fn new(runner: Arc<dyn ProcessRunner>, store_dir: PathBuf, bitrate_kbps: u32) -> Self {
        Self {
            runner,
            store_dir,
            bitrate_kbps,
        }
    }

    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    /// `<store>/<hash(userId)>_<userName>.mp3`
    pub fn destination(&self, user_id: &str, user_name: &str) -> PathBuf {
        self.store_dir
            .join(format!("{}.{}", track_token(user_id, user_name), TRACK_EXTENSION))
    }

    fn command(&self, source: &Path, output: &Path) -> CommandSpec {
        CommandSpec::new(TRANSCODE_SHELL)
            .args(["-c", TRANSCODE_SCRIPT, "transcode"])
            .path_arg(source)
            .arg(self.bitrate_kbps.to_string())
            .path_arg(output)
    }

    /// Converts `source` into the user's track, replacing any previous one.
    pub async fn transcode(
        &self,
        source: &Path,
        user_id: &str,
        user_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        tokio::fs::create_dir_all(&self.store_dir).await?;
        let destination = self.destination(user_id, user_name);
        let partial = self.store_dir.join(format!(
            ".{}.{:016x}.part.{}",
            track_token(user_id, user_name),
            rand::random::<u64>(),
            TRACK_EXTENSION
        ));

        debug!("Transcoding {:?} into {:?}", source, destination);
        let result = self.convert(source, &partial, cancel).await;
        if let Err(e) = result {
            remove_partial(&partial).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&partial, &destination).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }
        metrics::record_process_invocation("transcode", "success");
        info!("Transcoded {:?} to {:?}", source, destination);
        Ok(destination)
    }

    async fn convert(
        &self,
        source: &Path,
        partial: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        let spec = self.command(source, partial);
        let output = match self.runner.run(&spec, cancel).await {
            Ok(output) => output,
            Err(e) => {
                metrics::record_process_invocation("transcode", "launch_failed");
                return Err(e.into());
            }
        };

        if !output.success() {
            metrics::record_process_invocation("transcode", "failed");
            return Err(PipelineError::TranscodeFailed(format!(
                "{:?} exited with {:?}: {}",
                source, output.exit_code, output.stderr
            )));
        }
        if !tokio::fs::try_exists(partial).await.unwrap_or(false) {
            metrics::record_process_invocation("transcode", "failed");
            return Err(PipelineError::TranscodeFailed(format!(
                "no output produced for {:?}",
                source
            )));
        }
        Ok(())
    }

    /// Like [`transcode`](Self::transcode), but a toolchain failure degrades
    /// to the source track. Launch failures and shutdown still fail.
    pub async fn transcode_or_source(
        &self,
        source: &Path,
        user_id: &str,
        user_name: &str,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, PipelineError> {
        match self.transcode(source, user_id, user_name, cancel).await {
            Ok(path) => Ok(TranscodeOutcome::Transcoded(path)),
            Err(error @ PipelineError::TranscodeFailed(_)) => {
                warn!("{}, falling back to the source track", error);
                Ok(TranscodeOutcome::Degraded {
                    source: source.to_path_buf(),
                    error,
                })
            }
            Err(e) => Err(e),
        }
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial output {:?}: {}", path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ArgSlot, SimulatedEffect, SimulatedFailure, SimulatedProcessRunner};
    use tempfile::TempDir;

    #[test]
    fn java_hash_matches_the_jvm() {
        assert_eq!(java_hash(""), 0);
        assert_eq!(java_hash("a"), 97);
        assert_eq!(java_hash("hello"), 99162322);
        assert_eq!(java_hash("user-42"), -147182656);
        // Overflows and wraps like a Java int.
        assert_eq!(java_hash("polygenelubricants"), i32::MIN);
    }

    #[test]
    fn destination_uses_hash_and_name() {
        let transcoder = AudioTranscoder::new(
            Arc::new(SimulatedProcessRunner::new()),
            PathBuf::from("/music"),
            64,
        );
        assert_eq!(
            transcoder.destination("a", "alice"),
            PathBuf::from("/music/97_alice.mp3")
        );
    }

    fn toolchain() -> Arc<SimulatedProcessRunner> {
        Arc::new(
            SimulatedProcessRunner::new()
                .with_effect(TRANSCODE_SHELL, SimulatedEffect::WriteFileAt(ArgSlot::Last)),
        )
    }

    #[tokio::test]
    async fn transcode_replaces_previous_track() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("music");
        let source = dir.path().join("track.mid");
        std::fs::write(&source, b"midi").unwrap();
        let runner = toolchain();
        let transcoder = AudioTranscoder::new(runner.clone(), store.clone(), 64);
        std::fs::create_dir_all(&store).unwrap();
        std::fs::write(store.join("97_alice.mp3"), b"old").unwrap();

        let path = transcoder
            .transcode(&source, "a", "alice", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(path, store.join("97_alice.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"simulated");
        assert!(source.exists());
        let leftovers = std::fs::read_dir(&store).unwrap().count();
        assert_eq!(leftovers, 1);

        let spec = &runner.invocations()[0];
        assert_eq!(spec.program, "bash");
        assert_eq!(spec.args[0], "-c");
        assert_eq!(spec.args[3], source.to_string_lossy());
        assert_eq!(spec.args[4], "64");
    }

    #[tokio::test]
    async fn failure_degrades_to_source() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("rock_drums_1.mid");
        std::fs::write(&source, b"midi").unwrap();
        let runner = toolchain();
        runner.fail(TRANSCODE_SHELL, SimulatedFailure::Exit(1));
        let transcoder = AudioTranscoder::new(runner, dir.path().join("music"), 64);

        let outcome = transcoder
            .transcode_or_source(&source, "a", "alice", &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.is_degraded());
        assert_eq!(outcome.path(), source.as_path());
        assert_eq!(outcome.track_file(), "rock_drums_1");
        assert!(!dir.path().join("music/97_alice.mp3").exists());
    }

    #[tokio::test]
    async fn missing_output_is_a_transcode_failure() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("track.mid");
        std::fs::write(&source, b"midi").unwrap();
        let transcoder = AudioTranscoder::new(
            Arc::new(SimulatedProcessRunner::new()),
            dir.path().join("music"),
            64,
        );

        let result = transcoder
            .transcode(&source, "a", "alice", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(PipelineError::TranscodeFailed(_))));
    }

    #[tokio::test]
    async fn launch_failure_is_not_degraded() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("track.mid");
        std::fs::write(&source, b"midi").unwrap();
        let runner = toolchain();
        runner.fail(TRANSCODE_SHELL, SimulatedFailure::Launch);
        let transcoder = AudioTranscoder::new(runner, dir.path().join("music"), 64);

        let result = transcoder
            .transcode_or_source(&source, "a", "alice", &CancellationToken::new())
            .await;

        assert!(matches!(
            result,
            Err(PipelineError::ProcessLaunchFailed { .. })
        ));
    }
}

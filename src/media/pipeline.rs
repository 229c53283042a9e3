use super::composer::{ComposerPaths, VideoComposer};
use super::deletion::DeletionScheduler;
use super::image::{CommandImageRenderer, ImageRenderer, NoopImageRenderer};
use super::selector::TrackSelector;
use super::transcoder::{track_token, AudioTranscoder};
use super::PipelineError;
use crate::config::AppConfig;
use crate::corpus::CorpusStateProbe;
use crate::personality::{KeyedScorer, PersonalityScorer};
use crate::process::ProcessRunner;
use crate::server::metrics;
use crate::user::{InteractionOutcome, Play, Share, UserListing, UserRecord, UserRecordStore};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Body of a personality submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub user_id: String,
    pub user_name: String,
    pub answers: Vec<f64>,
}

/// Steps of a submission, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validate,
    Score,
    SelectTrack,
    Transcode,
    Persist,
    RenderImage,
    ComposeVideo,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Validate => "validate",
            PipelineStage::Score => "score",
            PipelineStage::SelectTrack => "select_track",
            PipelineStage::Transcode => "transcode",
            PipelineStage::Persist => "persist",
            PipelineStage::RenderImage => "render_image",
            PipelineStage::ComposeVideo => "compose_video",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-time media work: track selection, transcoding, persistence,
/// image and video generation.
pub struct MediaPipeline {
    store: Arc<dyn UserRecordStore>,
    scorer: Arc<dyn PersonalityScorer>,
    selector: TrackSelector,
    transcoder: AudioTranscoder,
    renderer: Arc<dyn ImageRenderer>,
    composer: Arc<VideoComposer>,
    question_count: usize,
    compose_on_submit: bool,
    compositions: Mutex<JoinSet<()>>,
    shutdown_token: CancellationToken,
}

const COMPOSITION_SHUTDOWN_WAIT: Duration = Duration::from_secs(10);

impl MediaPipeline {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn UserRecordStore>,
        runner: Arc<dyn ProcessRunner>,
        deletions: DeletionScheduler,
        shutdown_token: CancellationToken,
    ) -> Self {
        let paths = &config.paths;
        let renderer: Arc<dyn ImageRenderer> = match &config.media.image_renderer_program {
            Some(program) => Arc::new(CommandImageRenderer::new(
                Arc::clone(&runner),
                program.clone(),
                paths.image_store_dir.clone(),
            )),
            None => Arc::new(NoopImageRenderer),
        };
        let composer = VideoComposer::new(
            Arc::clone(&runner),
            ComposerPaths {
                image_dir: paths.image_store_dir.clone(),
                music_dir: paths.music_store_dir.clone(),
                video_dir: paths.video_store_dir.clone(),
            },
            config.media.video_ttl,
            config.media.relax_video_permissions,
            deletions,
        );

        Self {
            store,
            scorer: Arc::new(KeyedScorer),
            selector: TrackSelector::new(CorpusStateProbe::new(config.corpus_layout())),
            transcoder: AudioTranscoder::new(
                runner,
                paths.music_store_dir.clone(),
                config.media.transcode_bitrate_kbps,
            ),
            renderer,
            composer: Arc::new(composer),
            question_count: config.question_count,
            compose_on_submit: config.media.compose_on_submit,
            compositions: Mutex::new(JoinSet::new()),
            shutdown_token,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn PersonalityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    /// Evaluates a submission and stores the user with a freshly assigned
    /// track. Nothing is persisted unless every step up to persistence
    /// succeeded.
    pub async fn submit(&self, submission: AnswerSubmission) -> Result<UserRecord, PipelineError> {
        let result = self.run_submit(submission).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_pipeline_request("submit", outcome);
        result
    }

    async fn run_submit(&self, submission: AnswerSubmission) -> Result<UserRecord, PipelineError> {
        let AnswerSubmission {
            user_id,
            user_name,
            answers,
        } = submission;

        self.validate(&user_id, &user_name, &answers)
            .map_err(|e| failed(PipelineStage::Validate, e))?;

        let personality = self
            .scorer
            .score(&answers)
            .map_err(|e| failed(PipelineStage::Score, PipelineError::BadInput(e.to_string())))?;

        let source = self
            .selector
            .select(&personality)
            .map_err(|e| failed(PipelineStage::SelectTrack, e))?;
        debug!("Selected {:?} for {}", source, user_id);

        let track = self
            .transcoder
            .transcode_or_source(&source, &user_id, &user_name, &self.shutdown_token)
            .await
            .map_err(|e| failed(PipelineStage::Transcode, e))?;

        let record = match self
            .store
            .get(&user_id)
            .map_err(|e| failed(PipelineStage::Persist, e.into()))?
        {
            Some(mut existing) => {
                existing.reevaluate(&user_name, track.track_file(), personality);
                existing
            }
            None => UserRecord::new(&user_id, &user_name, track.track_file(), personality),
        };
        let record = self
            .store
            .upsert(&record)
            .map_err(|e| failed(PipelineStage::Persist, e.into()))?;
        info!(
            "Stored {} ({}) with track {}",
            record.user_id, record.user_name, record.track_file
        );

        self.render_and_compose(&record).await;
        Ok(record)
    }

    fn validate(&self, user_id: &str, user_name: &str, answers: &[f64]) -> Result<(), PipelineError> {
        if self.shutdown_token.is_cancelled() {
            return Err(PipelineError::ShuttingDown);
        }
        if answers.len() != self.question_count {
            return Err(PipelineError::BadInput(format!(
                "expected {} answers, got {}",
                self.question_count,
                answers.len()
            )));
        }
        if user_id.trim().is_empty() || user_name.trim().is_empty() {
            return Err(PipelineError::BadInput(
                "userId and userName must not be empty".to_string(),
            ));
        }
        VideoComposer::validate_token(&track_token(user_id, user_name))
    }

    /// Best-effort: the record is already stored, failures are only logged.
    async fn render_and_compose(&self, record: &UserRecord) {
        let image = match self.renderer.render(record, &self.shutdown_token).await {
            Ok(image) => image,
            Err(e) => {
                warn!(
                    "{} failed for {}: {}",
                    PipelineStage::RenderImage,
                    record.user_id,
                    e
                );
                return;
            }
        };

        if image.is_none() || !self.compose_on_submit {
            return;
        }
        let composer = Arc::clone(&self.composer);
        let token = record.track_file.clone();
        let cancel = self.shutdown_token.clone();
        let mut compositions = self.compositions.lock().unwrap();
        while compositions.try_join_next().is_some() {}
        compositions.spawn(async move {
            if let Err(e) = composer.compose(&token, &cancel).await {
                warn!("{} failed for {}: {}", PipelineStage::ComposeVideo, token, e);
            }
        });
    }

    /// Waits for compositions started by submissions. Cancel the pipeline's
    /// token first to interrupt the multiplexer.
    pub async fn shutdown(&self) {
        let mut compositions = std::mem::take(&mut *self.compositions.lock().unwrap());
        if compositions.is_empty() {
            return;
        }
        info!("Waiting for {} video compositions", compositions.len());
        let drained = tokio::time::timeout(COMPOSITION_SHUTDOWN_WAIT, async {
            while compositions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                "Video compositions did not stop within {:?}, aborting them",
                COMPOSITION_SHUTDOWN_WAIT
            );
            compositions.abort_all();
        }
    }

    /// Composes the video for `token` on demand.
    pub async fn compose_video(&self, token: &str) -> Result<PathBuf, PipelineError> {
        let result = self.composer.compose(token, &self.shutdown_token).await;
        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        metrics::record_pipeline_request("compose", outcome);
        result
    }

    pub fn get_user(&self, user_id: &str) -> Result<UserRecord, PipelineError> {
        self.store
            .get(user_id)?
            .ok_or_else(|| PipelineError::UserNotFound(user_id.to_string()))
    }

    pub fn list_users(
        &self,
        query: &str,
        min: usize,
        max: usize,
    ) -> Result<Vec<UserRecord>, PipelineError> {
        let listing = UserListing::parse(query, min, max).ok_or_else(|| {
            PipelineError::BadInput(format!("max ({}) is lower than min ({})", max, min))
        })?;
        Ok(self.store.list(&listing)?)
    }

    pub fn record_play(&self, play: &Play) -> Result<InteractionOutcome, PipelineError> {
        match self.store.record_play(play)? {
            InteractionOutcome::UnknownTarget => {
                Err(PipelineError::UserNotFound(play.played.clone()))
            }
            outcome => Ok(outcome),
        }
    }

    pub fn record_share(&self, share: &Share) -> Result<InteractionOutcome, PipelineError> {
        match self.store.record_share(share)? {
            InteractionOutcome::UnknownTarget => {
                Err(PipelineError::UserNotFound(share.shared.clone()))
            }
            outcome => Ok(outcome),
        }
    }
}

fn failed(stage: PipelineStage, err: PipelineError) -> PipelineError {
    warn!("Submission failed at {}: {}", stage, err);
    err
}

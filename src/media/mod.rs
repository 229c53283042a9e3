//! Request-time media work: picking a generated track for a user, turning it
//! into an MP3, rendering the personality image and muxing the video.

mod composer;
mod deletion;
mod error;
mod image;
mod pipeline;
mod selector;
mod transcoder;

pub use composer::{relax_permissions, ComposerPaths, VideoComposer, MULTIPLEXER};
pub use deletion::{DeletionScheduler, ScheduledDeletion};
pub use error::PipelineError;
pub use image::{CommandImageRenderer, ImageRenderer, NoopImageRenderer};
pub use pipeline::{AnswerSubmission, MediaPipeline, PipelineStage};
pub use selector::TrackSelector;
pub use transcoder::{
    java_hash, track_token, AudioTranscoder, TranscodeOutcome, TRACK_EXTENSION, TRANSCODE_SHELL,
};

mod file_config;

pub use file_config::{CatalogConfig, FileConfig, MediaConfig, PathsConfig, TrainingConfig};

use crate::corpus::{CorpusLayout, Genre, UnitCatalog};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub question_count: usize,
    pub frontend_dir_path: Option<String>,
    pub max_concurrent_units: Option<usize>,
    pub lenient_trainer_exit: bool,
    pub disable_training: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub data_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    /// Number of answers a submission must carry.
    pub question_count: usize,
    pub frontend_dir_path: Option<String>,

    pub paths: PathSettings,
    pub training: TrainingSettings,
    pub media: MediaSettings,
    pub catalog: UnitCatalog,
}

/// Filesystem locations, all defaulting to subdirectories of `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSettings {
    pub run_root: PathBuf,
    pub generated_tracks_dir: PathBuf,
    pub music_store_dir: PathBuf,
    pub image_store_dir: PathBuf,
    pub video_store_dir: PathBuf,
    pub dataset_file: PathBuf,
    pub working_dir: Option<PathBuf>,
}

impl PathSettings {
    pub fn under(data_dir: &Path) -> Self {
        Self {
            run_root: data_dir.join("melody_rnn").join("logdir"),
            generated_tracks_dir: data_dir.join("generated_tracks"),
            music_store_dir: data_dir.join("personality_music"),
            image_store_dir: data_dir.join("personality_images"),
            video_store_dir: data_dir.join("personality_videos"),
            dataset_file: data_dir
                .join("sequence_examples")
                .join("training_melodies.tfrecord"),
            working_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSettings {
    pub enabled: bool,
    /// Upper bound on units trained or generated at the same time, 0 for
    /// one slot per unit.
    pub max_concurrent_units: usize,
    pub target_pool_size: usize,
    pub num_training_steps: u32,
    pub num_generation_steps: u32,
    pub hparams: String,
    pub primer_melody: String,
    pub model_config: String,
    pub trainer_program: String,
    pub generator_program: String,
    pub lenient_trainer_exit: bool,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_units: 0,
            target_pool_size: 10,
            num_training_steps: 1,
            num_generation_steps: 128,
            hparams: "batch_size=64,rnn_layer_sizes=[64,64]".to_string(),
            primer_melody: "[60]".to_string(),
            model_config: "attention_rnn".to_string(),
            trainer_program: "melody_rnn_train".to_string(),
            generator_program: "melody_rnn_generate".to_string(),
            lenient_trainer_exit: false,
        }
    }
}

impl TrainingSettings {
    /// Worker slots for a catalog of `unit_count` units.
    pub fn effective_concurrency(&self, unit_count: usize) -> usize {
        match self.max_concurrent_units {
            0 => unit_count.max(1),
            n => n,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSettings {
    pub transcode_bitrate_kbps: u32,
    pub video_ttl: Duration,
    pub relax_video_permissions: bool,
    pub compose_on_submit: bool,
    pub image_renderer_program: Option<String>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            transcode_bitrate_kbps: 64,
            video_ttl: Duration::from_secs(600),
            relax_video_permissions: true,
            compose_on_submit: true,
            image_renderer_program: None,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .or_else(|| cli.data_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("data_dir must be specified via --data-dir or in config file")
            })?;

        if !data_dir.exists() {
            bail!("Data directory does not exist: {:?}", data_dir);
        }
        if !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let question_count = file.question_count.unwrap_or(cli.question_count);
        if question_count == 0 {
            bail!("question_count must be at least 1");
        }

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let paths = resolve_paths(&data_dir, file.paths.unwrap_or_default());
        let training = resolve_training(cli, file.training.unwrap_or_default())?;
        let media = resolve_media(file.media.unwrap_or_default());
        let catalog = resolve_catalog(file.catalog.unwrap_or_default())?;

        Ok(Self {
            data_dir,
            port,
            metrics_port,
            logging_level,
            question_count,
            frontend_dir_path,
            paths,
            training,
            media,
            catalog,
        })
    }

    pub fn user_db_path(&self) -> PathBuf {
        self.data_dir.join("users.db")
    }

    pub fn corpus_layout(&self) -> CorpusLayout {
        CorpusLayout {
            run_root: self.paths.run_root.clone(),
            generated_tracks_dir: self.paths.generated_tracks_dir.clone(),
            dataset_file: self.paths.dataset_file.clone(),
        }
    }
}

/// Relative TOML paths are taken relative to `data_dir`.
fn resolve_paths(data_dir: &Path, file: PathsConfig) -> PathSettings {
    let defaults = PathSettings::under(data_dir);
    let pick = |value: Option<String>, default: PathBuf| {
        value.map(|v| data_dir.join(v)).unwrap_or(default)
    };
    PathSettings {
        run_root: pick(file.run_root, defaults.run_root),
        generated_tracks_dir: pick(file.generated_tracks_dir, defaults.generated_tracks_dir),
        music_store_dir: pick(file.music_store_dir, defaults.music_store_dir),
        image_store_dir: pick(file.image_store_dir, defaults.image_store_dir),
        video_store_dir: pick(file.video_store_dir, defaults.video_store_dir),
        dataset_file: pick(file.dataset_file, defaults.dataset_file),
        working_dir: file.working_dir.map(|v| data_dir.join(v)),
    }
}

fn resolve_training(cli: &CliConfig, file: TrainingConfig) -> Result<TrainingSettings> {
    let defaults = TrainingSettings::default();
    let settings = TrainingSettings {
        enabled: file.enabled.unwrap_or(!cli.disable_training),
        max_concurrent_units: file
            .max_concurrent_units
            .or(cli.max_concurrent_units)
            .unwrap_or(defaults.max_concurrent_units),
        target_pool_size: file.target_pool_size.unwrap_or(defaults.target_pool_size),
        num_training_steps: file
            .num_training_steps
            .unwrap_or(defaults.num_training_steps),
        num_generation_steps: file
            .num_generation_steps
            .unwrap_or(defaults.num_generation_steps),
        hparams: file.hparams.unwrap_or(defaults.hparams),
        primer_melody: file.primer_melody.unwrap_or(defaults.primer_melody),
        model_config: file.model_config.unwrap_or(defaults.model_config),
        trainer_program: file.trainer_program.unwrap_or(defaults.trainer_program),
        generator_program: file.generator_program.unwrap_or(defaults.generator_program),
        lenient_trainer_exit: file
            .lenient_trainer_exit
            .unwrap_or(cli.lenient_trainer_exit),
    };
    if settings.target_pool_size == 0 {
        bail!("training.target_pool_size must be at least 1");
    }
    Ok(settings)
}

fn resolve_media(file: MediaConfig) -> MediaSettings {
    let defaults = MediaSettings::default();
    MediaSettings {
        transcode_bitrate_kbps: file
            .transcode_bitrate_kbps
            .unwrap_or(defaults.transcode_bitrate_kbps),
        video_ttl: file
            .video_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.video_ttl),
        relax_video_permissions: file
            .relax_video_permissions
            .unwrap_or(defaults.relax_video_permissions),
        compose_on_submit: file.compose_on_submit.unwrap_or(defaults.compose_on_submit),
        image_renderer_program: file.image_renderer_program,
    }
}

fn resolve_catalog(file: CatalogConfig) -> Result<UnitCatalog> {
    let builtin = UnitCatalog::builtin();
    let Some(names) = file.genres else {
        return Ok(builtin);
    };
    let genres = names
        .iter()
        .map(|name| name.parse::<Genre>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    let catalog = builtin.restricted_to(&genres);
    if catalog.is_empty() {
        bail!("catalog.genres selects no generation unit");
    }
    Ok(catalog)
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

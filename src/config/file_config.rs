use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub data_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub question_count: Option<usize>,
    pub frontend_dir_path: Option<String>,

    // Feature configs
    pub paths: Option<PathsConfig>,
    pub training: Option<TrainingConfig>,
    pub media: Option<MediaConfig>,
    pub catalog: Option<CatalogConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub run_root: Option<String>,
    pub generated_tracks_dir: Option<String>,
    pub music_store_dir: Option<String>,
    pub image_store_dir: Option<String>,
    pub video_store_dir: Option<String>,
    pub dataset_file: Option<String>,
    /// Working directory of the trainer and generator.
    pub working_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct TrainingConfig {
    pub enabled: Option<bool>,
    /// 0 means one slot per unit.
    pub max_concurrent_units: Option<usize>,
    pub target_pool_size: Option<usize>,
    pub num_training_steps: Option<u32>,
    pub num_generation_steps: Option<u32>,
    pub hparams: Option<String>,
    pub primer_melody: Option<String>,
    pub model_config: Option<String>,
    pub trainer_program: Option<String>,
    pub generator_program: Option<String>,
    /// Treat any trainer exit as success.
    pub lenient_trainer_exit: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MediaConfig {
    pub transcode_bitrate_kbps: Option<u32>,
    pub video_ttl_secs: Option<u64>,
    pub relax_video_permissions: Option<bool>,
    pub compose_on_submit: Option<bool>,
    pub image_renderer_program: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CatalogConfig {
    /// Restricts the built-in catalog to these genres.
    pub genres: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

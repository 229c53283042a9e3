use super::catalog::GenerationUnit;
use std::path::{Path, PathBuf};

/// Where each unit keeps its model run and its generated tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusLayout {
    pub run_root: PathBuf,
    pub generated_tracks_dir: PathBuf,
    /// Sequence-example file every unit is trained from.
    pub dataset_file: PathBuf,
}

impl CorpusLayout {
    pub fn run_dir(&self, unit: &GenerationUnit) -> PathBuf {
        self.run_root.join(format!("run_{}", unit.key()))
    }

    pub fn output_dir(&self, unit: &GenerationUnit) -> PathBuf {
        self.generated_tracks_dir.join(unit.key())
    }

    pub fn dataset_file(&self) -> &Path {
        &self.dataset_file
    }
}

//! Filesystem probes for training and pool state.

use super::catalog::GenerationUnit;
use super::layout::CorpusLayout;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CorpusStateProbe {
    layout: CorpusLayout,
}

impl CorpusStateProbe {
    pub fn new(layout: CorpusLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &CorpusLayout {
        &self.layout
    }

    /// A unit is trained once its run directory exists.
    pub fn has_trained_model(&self, unit: &GenerationUnit) -> bool {
        self.layout.run_dir(unit).is_dir()
    }

    /// Number of candidate tracks for the unit, 0 when its directory is missing.
    pub fn pool_size(&self, unit: &GenerationUnit) -> io::Result<usize> {
        match Self::pool(&self.layout.output_dir(unit)) {
            Ok(tracks) => Ok(tracks.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Unit output directories present on disk, sorted by path.
    pub fn unit_dirs(&self) -> io::Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.layout.generated_tracks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() && !is_hidden(&entry.path()) {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Candidate tracks in `dir`: regular, non-hidden files, sorted by path.
    pub fn pool(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut tracks = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && !is_hidden(&entry.path()) {
                tracks.push(entry.path());
            }
        }
        tracks.sort();
        Ok(tracks)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

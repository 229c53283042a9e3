//! Test fixture creation for the data directory

use super::constants::*;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Creates an empty data directory. Every store defaults to a subdirectory
/// of it.
pub fn create_data_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Puts one generated track into `<generated_tracks_dir>/<unit>/`.
/// Returns the path of the track.
pub fn seed_generated_track(generated_tracks_dir: &Path, unit: &str) -> Result<PathBuf> {
    let unit_dir = generated_tracks_dir.join(unit);
    fs::create_dir_all(&unit_dir)?;
    let track = unit_dir.join(SEEDED_TRACK);
    fs::write(&track, b"MThd")?;
    Ok(track)
}

//! Picks the generated track a new user gets.

use super::PipelineError;
use crate::corpus::CorpusStateProbe;
use crate::personality::PersonalityVector;
use rand::seq::IndexedRandom;
use rand::Rng;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct TrackSelector {
    probe: CorpusStateProbe,
}

impl TrackSelector {
    pub fn new(probe: CorpusStateProbe) -> Self {
        Self { probe }
    }

    /// Uniformly picks a unit directory, then uniformly picks a track in it.
    /// The personality does not bias the choice yet.
    pub fn select(&self, personality: &PersonalityVector) -> Result<PathBuf, PipelineError> {
        self.select_with(personality, &mut rand::rng())
    }

    pub fn select_with<R: Rng + ?Sized>(
        &self,
        _personality: &PersonalityVector,
        rng: &mut R,
    ) -> Result<PathBuf, PipelineError> {
        let dirs = self.probe.unit_dirs()?;
        let dir = dirs.choose(rng).ok_or_else(|| {
            PipelineError::NoCandidateAvailable(format!(
                "no unit directories in {:?}",
                self.probe.layout().generated_tracks_dir
            ))
        })?;

        let tracks = CorpusStateProbe::pool(dir)?;
        tracks.choose(rng).cloned().ok_or_else(|| {
            PipelineError::NoCandidateAvailable(format!("unit directory {:?} is empty", dir))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusLayout;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn selector(dir: &TempDir) -> TrackSelector {
        TrackSelector::new(CorpusStateProbe::new(CorpusLayout {
            run_root: dir.path().join("logdir"),
            generated_tracks_dir: dir.path().join("generated_tracks"),
            dataset_file: dir.path().join("melodies.tfrecord"),
        }))
    }

    #[test]
    fn missing_pool_is_no_candidate() {
        let dir = TempDir::new().unwrap();
        let result = selector(&dir).select(&PersonalityVector::default());
        assert!(matches!(result, Err(PipelineError::NoCandidateAvailable(_))));
    }

    #[test]
    fn empty_unit_directory_is_no_candidate() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("generated_tracks/rock_drums")).unwrap();

        let result = selector(&dir).select(&PersonalityVector::default());

        assert!(matches!(result, Err(PipelineError::NoCandidateAvailable(_))));
    }

    #[test]
    fn hidden_files_are_never_selected() {
        let dir = TempDir::new().unwrap();
        let unit_dir = dir.path().join("generated_tracks/jazz_piano");
        std::fs::create_dir_all(&unit_dir).unwrap();
        std::fs::write(unit_dir.join(".partial.mid"), b"").unwrap();

        let result = selector(&dir).select(&PersonalityVector::default());

        assert!(matches!(result, Err(PipelineError::NoCandidateAvailable(_))));
    }

    #[test]
    fn every_track_can_be_selected() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("generated_tracks");
        for (unit, track) in [("rock_drums", "a.mid"), ("pop_synth", "b.mid"), ("pop_synth", "c.mid")] {
            std::fs::create_dir_all(root.join(unit)).unwrap();
            std::fs::write(root.join(unit).join(track), b"").unwrap();
        }
        let selector = selector(&dir);
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let track = selector
                .select_with(&PersonalityVector::default(), &mut rng)
                .unwrap();
            seen.insert(track.file_name().unwrap().to_string_lossy().to_string());
        }

        assert_eq!(seen.len(), 3);
    }
}

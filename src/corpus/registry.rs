//! Explicit per-unit state, rebuilt from the filesystem at start and then
//! updated by the orchestrator as each step finishes.

use super::catalog::{GenerationUnit, UnitCatalog};
use super::probe::CorpusStateProbe;
use crate::server::metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Untrained,
    Training,
    Trained,
    Failed,
}

impl TrainingState {
    pub const ALL: [TrainingState; 4] = [
        TrainingState::Untrained,
        TrainingState::Training,
        TrainingState::Trained,
        TrainingState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingState::Untrained => "untrained",
            TrainingState::Training => "training",
            TrainingState::Trained => "trained",
            TrainingState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitFailureKind {
    ProcessLaunchFailed,
    ProcessFailed,
    Cancelled,
    Probe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub kind: UnitFailureKind,
    pub message: String,
    pub retryable: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitState {
    pub training: TrainingState,
    pub pool_size: usize,
    pub last_error: Option<UnitFailure>,
}

impl UnitState {
    fn untrained() -> Self {
        Self {
            training: TrainingState::Untrained,
            pool_size: 0,
            last_error: None,
        }
    }
}

/// Serializable view of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitSnapshot {
    pub unit: String,
    pub genre: String,
    pub instrument: String,
    #[serde(flatten)]
    pub state: UnitState,
}

#[derive(Debug, Clone, Default)]
pub struct CorpusRegistry {
    units: Arc<RwLock<BTreeMap<GenerationUnit, UnitState>>>,
}

impl CorpusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole registry with what the filesystem says now.
    pub fn rebuild(&self, catalog: &UnitCatalog, probe: &CorpusStateProbe) {
        let mut rebuilt = BTreeMap::new();
        for unit in catalog.units() {
            let mut state = UnitState::untrained();
            if probe.has_trained_model(unit) {
                state.training = TrainingState::Trained;
            }
            match probe.pool_size(unit) {
                Ok(size) => state.pool_size = size,
                Err(e) => warn!("Failed to count tracks of {}: {}", unit, e),
            }
            rebuilt.insert(*unit, state);
        }
        *self.units.write().unwrap() = rebuilt;
        self.publish_metrics();
    }

    pub fn get(&self, unit: &GenerationUnit) -> Option<UnitState> {
        self.units.read().unwrap().get(unit).cloned()
    }

    pub fn len(&self) -> usize {
        self.units.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_training(&self, unit: &GenerationUnit, training: TrainingState) {
        self.update(unit, |state| {
            state.training = training;
            if training != TrainingState::Failed {
                state.last_error = None;
            }
        });
    }

    pub fn set_pool_size(&self, unit: &GenerationUnit, pool_size: usize) {
        self.update(unit, |state| state.pool_size = pool_size);
    }

    /// Records a failed step. A unit that failed while training is marked
    /// `Failed`; a trained unit stays trained and only carries the error.
    pub fn record_failure(&self, unit: &GenerationUnit, failure: UnitFailure) {
        self.update(unit, |state| {
            if state.training != TrainingState::Trained {
                state.training = TrainingState::Failed;
            }
            state.last_error = Some(failure);
        });
    }

    pub fn snapshot(&self) -> Vec<UnitSnapshot> {
        self.units
            .read()
            .unwrap()
            .iter()
            .map(|(unit, state)| UnitSnapshot {
                unit: unit.key(),
                genre: unit.genre().to_string(),
                instrument: unit.instrument().to_string(),
                state: state.clone(),
            })
            .collect()
    }

    pub fn count_in(&self, training: TrainingState) -> usize {
        self.units
            .read()
            .unwrap()
            .values()
            .filter(|state| state.training == training)
            .count()
    }

    fn update(&self, unit: &GenerationUnit, f: impl FnOnce(&mut UnitState)) {
        {
            let mut units = self.units.write().unwrap();
            f(units.entry(*unit).or_insert_with(UnitState::untrained));
        }
        self.publish_metrics();
    }

    fn publish_metrics(&self) {
        for training in TrainingState::ALL {
            metrics::set_units_in_state(training.as_str(), self.count_in(training));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::{CorpusLayout, Genre, Instrument};
    use tempfile::TempDir;

    fn setup() -> (TempDir, CorpusStateProbe, UnitCatalog) {
        let dir = TempDir::new().unwrap();
        let probe = CorpusStateProbe::new(CorpusLayout {
            run_root: dir.path().join("logdir"),
            generated_tracks_dir: dir.path().join("generated_tracks"),
            dataset_file: dir.path().join("melodies.tfrecord"),
        });
        let catalog = UnitCatalog::from_units([
            GenerationUnit::new(Genre::Rock, Instrument::Drums).unwrap(),
            GenerationUnit::new(Genre::Jazz, Instrument::Piano).unwrap(),
        ]);
        (dir, probe, catalog)
    }

    fn failure(kind: UnitFailureKind) -> UnitFailure {
        UnitFailure {
            kind,
            message: "boom".to_string(),
            retryable: true,
            at: Utc::now(),
        }
    }

    #[test]
    fn rebuild_reads_filesystem_state() {
        let (_dir, probe, catalog) = setup();
        let rock = catalog.units()[0];
        let jazz = catalog.units()[1];
        std::fs::create_dir_all(probe.layout().run_dir(&rock)).unwrap();
        let out = probe.layout().output_dir(&rock);
        std::fs::create_dir_all(&out).unwrap();
        std::fs::write(out.join("one.mid"), b"").unwrap();

        let registry = CorpusRegistry::new();
        registry.rebuild(&catalog, &probe);

        let rock_state = registry.get(&rock).unwrap();
        assert_eq!(rock_state.training, TrainingState::Trained);
        assert_eq!(rock_state.pool_size, 1);
        let jazz_state = registry.get(&jazz).unwrap();
        assert_eq!(jazz_state.training, TrainingState::Untrained);
        assert_eq!(jazz_state.pool_size, 0);
    }

    #[test]
    fn rebuild_discards_previous_state() {
        let (_dir, probe, catalog) = setup();
        let rock = catalog.units()[0];
        let registry = CorpusRegistry::new();
        registry.rebuild(&catalog, &probe);
        registry.record_failure(&rock, failure(UnitFailureKind::ProcessFailed));

        registry.rebuild(&catalog, &probe);

        assert_eq!(registry.get(&rock).unwrap(), UnitState::untrained());
    }

    #[test]
    fn failure_while_training_marks_unit_failed() {
        let (_dir, probe, catalog) = setup();
        let rock = catalog.units()[0];
        let registry = CorpusRegistry::new();
        registry.rebuild(&catalog, &probe);
        registry.set_training(&rock, TrainingState::Training);

        registry.record_failure(&rock, failure(UnitFailureKind::ProcessLaunchFailed));

        let state = registry.get(&rock).unwrap();
        assert_eq!(state.training, TrainingState::Failed);
        assert_eq!(
            state.last_error.unwrap().kind,
            UnitFailureKind::ProcessLaunchFailed
        );
    }

    #[test]
    fn failure_after_training_keeps_unit_trained() {
        let (_dir, probe, catalog) = setup();
        let rock = catalog.units()[0];
        let registry = CorpusRegistry::new();
        registry.rebuild(&catalog, &probe);
        registry.set_training(&rock, TrainingState::Trained);

        registry.record_failure(&rock, failure(UnitFailureKind::ProcessFailed));

        let state = registry.get(&rock).unwrap();
        assert_eq!(state.training, TrainingState::Trained);
        assert!(state.last_error.is_some());
    }

    #[test]
    fn snapshot_is_keyed_and_ordered() {
        let (_dir, probe, catalog) = setup();
        let registry = CorpusRegistry::new();
        registry.rebuild(&catalog, &probe);

        let keys: Vec<String> = registry.snapshot().into_iter().map(|s| s.unit).collect();

        assert_eq!(keys, vec!["rock_drums", "jazz_piano"]);
        assert_eq!(registry.count_in(TrainingState::Untrained), 2);
    }
}

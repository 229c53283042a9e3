//! Generation units and the on-disk corpus of models and tracks.

mod catalog;
mod layout;
mod probe;
mod registry;

pub use catalog::{GenerationUnit, Genre, Instrument, UnitCatalog};
pub use layout::CorpusLayout;
pub use probe::CorpusStateProbe;
pub use registry::{
    CorpusRegistry, TrainingState, UnitFailure, UnitFailureKind, UnitSnapshot, UnitState,
};

//! Model training and track generation for the generation units.

mod commands;
mod error;
mod orchestrator;

pub use commands::TrainingCommands;
pub use error::{TrainingStep, UnitError};
pub use orchestrator::TrainingOrchestrator;

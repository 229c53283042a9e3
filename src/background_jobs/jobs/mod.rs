//! Specific background job implementations.

pub mod unit_training;

pub use unit_training::{PassReport, UnitTrainingJob};

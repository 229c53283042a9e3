//! MusicMind Server Library
//!
//! Trains per-genre melody models in the background, assigns generated
//! tracks to users from their personality answers and serves the results
//! over HTTP. The modules are public for the binary and the e2e tests.

pub mod background_jobs;
pub mod config;
pub mod corpus;
pub mod media;
pub mod personality;
pub mod process;
pub mod server;
pub mod sqlite_persistence;
pub mod training;
pub mod user;

// Re-export commonly used types for convenience
pub use media::{MediaPipeline, PipelineError};
pub use server::{run_server, RequestsLoggingLevel};
pub use training::TrainingOrchestrator;
pub use user::{SqliteUserRecordStore, UserRecordStore};

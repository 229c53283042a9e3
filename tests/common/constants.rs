//! Shared constants for end-to-end tests
//!
//! When test data changes (user ids, corpus layout, timeouts),
//! update only this file.

// ============================================================================
// Survey
// ============================================================================

/// Number of answers every test server expects per submission
pub const QUESTION_COUNT: usize = 5;

/// A valid answer set, one answer per trait
pub const ANSWERS: [f64; QUESTION_COUNT] = [1.0, 2.0, 3.0, 4.0, 5.0];

// ============================================================================
// Test Users
// ============================================================================

pub const USER_1_ID: &str = "user-1";
pub const USER_1_NAME: &str = "alice";

pub const USER_2_ID: &str = "user-2";
pub const USER_2_NAME: &str = "bob";

pub const USER_3_ID: &str = "user-3";
pub const USER_3_NAME: &str = "carol";

// ============================================================================
// Corpus
// ============================================================================

/// Unit whose generated-tracks directory is seeded with one track
pub const SEEDED_UNIT: &str = "rock_drums";

/// File name of the seeded track
pub const SEEDED_TRACK: &str = "seeded.mid";

/// Program name the simulated image renderer answers to
pub const IMAGE_RENDERER: &str = "render_personality";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// HTTP request timeout
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server readiness
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Upper bound for a simulated training pass
pub const TRAINING_TIMEOUT_SECS: u64 = 30;

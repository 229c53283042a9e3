//! External process execution.

mod runner;
mod simulated;

pub use runner::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner, TokioProcessRunner};
pub use simulated::{ArgSlot, SimulatedEffect, SimulatedFailure, SimulatedProcessRunner};

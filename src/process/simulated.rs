//! In-process stand-in for the external toolchain.
//!
//! Each known program is mapped to the filesystem side effect the real tool
//! would have (a run directory, a generated track, an output file). This lets
//! the server run on machines without the model/audio/video tools installed,
//! and gives tests a recording runner with failure injection.

use super::runner::{CommandSpec, ProcessError, ProcessOutput, ProcessRunner};
use crate::media::{MULTIPLEXER, TRANSCODE_SHELL};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static GENERATED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Which argument of a command names its output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    First,
    Last,
    /// Counted from the end, `FromEnd(0)` is the last argument.
    FromEnd(usize),
}

impl ArgSlot {
    fn pick<'a>(&self, args: &'a [String]) -> Option<&'a str> {
        let index = match self {
            ArgSlot::First => 0,
            ArgSlot::Last => args.len().checked_sub(1)?,
            ArgSlot::FromEnd(n) => args.len().checked_sub(n + 1)?,
        };
        args.get(index).map(String::as_str)
    }
}

/// Filesystem effect of a successful simulated run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedEffect {
    /// Creates the directory given by a `--flag=<dir>` argument.
    CreateDirFromFlag(String),
    /// Writes one new uniquely named file into the `--flag=<dir>` directory.
    AddFileToDirFromFlag { flag: String, extension: String },
    /// Writes the file named by an argument.
    WriteFileAt(ArgSlot),
    Nothing,
}

/// Injected failure for a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedFailure {
    Launch,
    Exit(i32),
}

#[derive(Default)]
pub struct SimulatedProcessRunner {
    effects: Mutex<HashMap<String, SimulatedEffect>>,
    failures: Mutex<HashMap<String, SimulatedFailure>>,
    invocations: Mutex<Vec<CommandSpec>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SimulatedProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every program the server drives: trainer, generator, the transcode
    /// shell, the multiplexer and the image renderer when one is configured.
    pub fn toolchain(trainer: &str, generator: &str, image_renderer: Option<&str>) -> Self {
        let runner = Self::new()
            .with_effect(trainer, SimulatedEffect::CreateDirFromFlag("--run_dir".into()))
            .with_effect(
                generator,
                SimulatedEffect::AddFileToDirFromFlag {
                    flag: "--output_dir".into(),
                    extension: "mid".into(),
                },
            )
            .with_effect(TRANSCODE_SHELL, SimulatedEffect::WriteFileAt(ArgSlot::Last))
            .with_effect(MULTIPLEXER, SimulatedEffect::WriteFileAt(ArgSlot::FromEnd(1)));
        match image_renderer {
            Some(program) => runner.with_effect(program, SimulatedEffect::WriteFileAt(ArgSlot::First)),
            None => runner,
        }
    }

    pub fn with_effect(self, program: impl Into<String>, effect: SimulatedEffect) -> Self {
        self.effects
            .lock()
            .unwrap()
            .insert(program.into(), effect);
        self
    }

    /// Every invocation sleeps this long before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail(&self, program: &str, failure: SimulatedFailure) {
        self.failures
            .lock()
            .unwrap()
            .insert(program.to_string(), failure);
    }

    pub fn clear_failure(&self, program: &str) {
        self.failures.lock().unwrap().remove(program);
    }

    pub fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invocations_of(&self, program: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|spec| spec.program == program)
            .count()
    }

    /// Highest number of simultaneously running invocations seen so far.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(ProcessError::Cancelled {
                        program: spec.program.clone(),
                    });
                }
            }
        }

        let failure = self.failures.lock().unwrap().get(&spec.program).copied();
        match failure {
            Some(SimulatedFailure::Launch) => {
                return Err(ProcessError::LaunchFailed {
                    program: spec.program.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "simulated launch failure",
                    ),
                })
            }
            Some(SimulatedFailure::Exit(code)) => {
                return Ok(ProcessOutput {
                    program: spec.program.clone(),
                    exit_code: Some(code),
                    stderr: format!("simulated exit {}", code),
                })
            }
            None => {}
        }

        let effect = self
            .effects
            .lock()
            .unwrap()
            .get(&spec.program)
            .cloned()
            .unwrap_or(SimulatedEffect::Nothing);

        if let Err(e) = apply_effect(&effect, spec) {
            return Ok(ProcessOutput {
                program: spec.program.clone(),
                exit_code: Some(1),
                stderr: e.to_string(),
            });
        }

        Ok(ProcessOutput {
            program: spec.program.clone(),
            exit_code: Some(0),
            stderr: String::new(),
        })
    }
}

#[async_trait]
impl ProcessRunner for SimulatedProcessRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled {
                program: spec.program.clone(),
            });
        }

        debug!("Simulating `{}`", spec.display());
        self.invocations.lock().unwrap().push(spec.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.simulate(spec, cancel).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        result
    }
}

fn apply_effect(effect: &SimulatedEffect, spec: &CommandSpec) -> std::io::Result<()> {
    match effect {
        SimulatedEffect::CreateDirFromFlag(flag) => {
            let dir = required_flag(spec, flag)?;
            std::fs::create_dir_all(dir)
        }
        SimulatedEffect::AddFileToDirFromFlag { flag, extension } => {
            let dir = PathBuf::from(required_flag(spec, flag)?);
            std::fs::create_dir_all(&dir)?;
            let n = GENERATED_COUNTER.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dir.join(format!("simulated_{:06}.{}", n, extension)), b"")
        }
        SimulatedEffect::WriteFileAt(slot) => {
            let path = slot.pick(&spec.args).map(Path::new).ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing output argument")
            })?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, b"simulated")
        }
        SimulatedEffect::Nothing => Ok(()),
    }
}

fn required_flag<'a>(spec: &'a CommandSpec, flag: &str) -> std::io::Result<&'a str> {
    spec.flag_value(flag).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("missing {} argument", flag),
        )
    })
}

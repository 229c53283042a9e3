//! Execution of external programs through `tokio::process`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Only the tail of stderr is kept, external tools can be very chatty.
const STDERR_TAIL_BYTES: usize = 4096;

/// Errors that can occur while running an external program.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", describe_exit(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} was cancelled")]
    Cancelled { program: String },
}

impl ProcessError {
    pub fn program(&self) -> &str {
        match self {
            ProcessError::LaunchFailed { program, .. }
            | ProcessError::Failed { program, .. }
            | ProcessError::Cancelled { program } => program,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "no status (killed by signal)".to_string(),
    }
}

/// A program invocation: what to run, with which arguments, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a path argument using its lossy UTF-8 form.
    pub fn path_arg(self, path: &Path) -> Self {
        let arg = path.to_string_lossy().into_owned();
        self.arg(arg)
    }

    pub fn current_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Value of a `--flag=value` style argument.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        let prefix = format!("{}=", flag);
        self.args
            .iter()
            .find_map(|arg| arg.strip_prefix(prefix.as_str()))
    }

    /// Shell-quoted rendering of the command line, for logs.
    pub fn display(&self) -> String {
        let parts = std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str));
        shlex::try_join(parts).unwrap_or_else(|_| format!("{} {}", self.program, self.args.join(" ")))
    }
}

/// Result of a program that ran to completion, successfully or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub program: String,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turns a non-zero exit into [`ProcessError::Failed`].
    pub fn ensure_success(self) -> Result<ProcessOutput, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                program: self.program,
                code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Runs external programs.
///
/// A non-zero exit is not an error at this level: the caller decides what a
/// failure means for its step. `Err` is reserved for programs that could not
/// be started or that were interrupted through `cancel`.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by real child processes.
///
/// Children are killed when `cancel` fires, and also when the future running
/// them is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
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

        debug!(
            "Launching `{}` (working dir: {:?})",
            spec.display(),
            spec.working_dir
        );

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::LaunchFailed {
            program: spec.program.clone(),
            source,
        })?;

        let stderr_pipe = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                if let Err(e) = pipe.read_to_end(&mut buffer).await {
                    debug!("Failed to read child stderr: {}", e);
                }
            }
            buffer
        });

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| wait_failed(&spec.program, e))?,
            _ = cancel.cancelled() => {
                warn!("Cancelling {} (pid {:?})", spec.program, child.id());
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill {}: {}", spec.program, e);
                }
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(ProcessError::Cancelled {
                    program: spec.program.clone(),
                });
            }
        };

        let stderr = stderr_task.await.unwrap_or_default();
        let output = ProcessOutput {
            program: spec.program.clone(),
            exit_code: status.code(),
            stderr: stderr_tail(&stderr),
        };

        if !output.success() {
            warn!(
                "{} exited with {}: {}",
                spec.program,
                describe_exit(&output.exit_code),
                output.stderr
            );
        }

        Ok(output)
    }
}

/// The child was started, so losing track of it is a failed run, not a
/// launch failure.
fn wait_failed(program: &str, source: std::io::Error) -> ProcessError {
    ProcessError::Failed {
        program: program.to_string(),
        code: None,
        stderr: format!("failed to wait for exit: {}", source),
    }
}

fn stderr_tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

//! One orchestration pass for one generation unit: train the model if it
//! has never been trained, then top the track pool up by one.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, ShutdownBehavior};
use crate::corpus::{CorpusRegistry, CorpusStateProbe, GenerationUnit, TrainingState};
use crate::process::ProcessError;
use crate::server::metrics;
use crate::training::{TrainingCommands, TrainingStep, UnitError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassReport {
    pub trained: bool,
    pub generated: usize,
    pub pool_size: usize,
}

pub struct UnitTrainingJob {
    id: String,
    name: String,
    description: String,
    unit: GenerationUnit,
    probe: CorpusStateProbe,
    registry: CorpusRegistry,
    commands: Arc<TrainingCommands>,
}

impl UnitTrainingJob {
    pub fn new(
        unit: GenerationUnit,
        probe: CorpusStateProbe,
        registry: CorpusRegistry,
        commands: Arc<TrainingCommands>,
    ) -> Self {
        Self {
            id: format!("train_{}", unit.key()),
            name: format!("Train {}", unit),
            description: format!(
                "Trains the {} model if missing and renders one more track while the pool has fewer than {}",
                unit,
                commands.settings().target_pool_size
            ),
            unit,
            probe,
            registry,
            commands,
        }
    }

    pub fn unit(&self) -> &GenerationUnit {
        &self.unit
    }

    /// Trainer strictly before generator. Stops before launching anything
    /// once the context is cancelled.
    pub async fn run_pass(&self, ctx: &JobContext) -> Result<PassReport, UnitError> {
        let mut report = PassReport::default();

        if self.probe.has_trained_model(&self.unit) {
            self.registry.set_training(&self.unit, TrainingState::Trained);
        } else {
            self.train(ctx).await?;
            report.trained = true;
        }

        let pool_size = self.probe.pool_size(&self.unit)?;
        self.registry.set_pool_size(&self.unit, pool_size);
        report.pool_size = pool_size;

        let target = self.commands.settings().target_pool_size;
        if pool_size >= target {
            debug!(
                "{} already has {} tracks (target {})",
                self.unit, pool_size, target
            );
            return Ok(report);
        }

        self.generate(ctx).await?;
        let pool_size = self.probe.pool_size(&self.unit)?;
        self.registry.set_pool_size(&self.unit, pool_size);
        report.generated = 1;
        report.pool_size = pool_size;
        info!(
            "Track for {} generated, pool now has {} tracks",
            self.unit, pool_size
        );

        Ok(report)
    }

    async fn train(&self, ctx: &JobContext) -> Result<(), UnitError> {
        let settings = self.commands.settings();
        let spec = self.commands.trainer(&self.unit);
        check_cancelled(ctx, &spec.program, TrainingStep::Train)?;

        info!(
            "No trained model for {}, training for {} steps",
            self.unit, settings.num_training_steps
        );
        self.registry.set_training(&self.unit, TrainingState::Training);

        let output = ctx
            .runner
            .run(&spec, &ctx.cancellation_token)
            .await
            .map_err(|e| {
                metrics::record_process_invocation("train", outcome_label(&e));
                UnitError::process(TrainingStep::Train, e)
            })?;

        if !output.success() {
            metrics::record_process_invocation("train", "failed");
            if settings.lenient_trainer_exit {
                warn!(
                    "Trainer for {} exited with {:?}, treating it as trained",
                    self.unit, output.exit_code
                );
                self.registry.set_training(&self.unit, TrainingState::Trained);
                return Ok(());
            }
            if let Err(e) = output.ensure_success() {
                return Err(UnitError::process(TrainingStep::Train, e));
            }
            return Ok(());
        }
        metrics::record_process_invocation("train", "success");

        if !self.probe.has_trained_model(&self.unit) && !settings.lenient_trainer_exit {
            return Err(UnitError::MissingRunDir(
                self.probe.layout().run_dir(&self.unit),
            ));
        }

        info!("Model for {} trained", self.unit);
        self.registry.set_training(&self.unit, TrainingState::Trained);
        Ok(())
    }

    async fn generate(&self, ctx: &JobContext) -> Result<(), UnitError> {
        let spec = self.commands.generator(&self.unit);
        check_cancelled(ctx, &spec.program, TrainingStep::Generate)?;
        debug!("Generating one track for {}", self.unit);

        let result = ctx
            .runner
            .run(&spec, &ctx.cancellation_token)
            .await
            .and_then(|output| output.ensure_success());
        match result {
            Ok(_) => {
                metrics::record_process_invocation("generate", "success");
                Ok(())
            }
            Err(e) => {
                metrics::record_process_invocation("generate", outcome_label(&e));
                Err(UnitError::process(TrainingStep::Generate, e))
            }
        }
    }
}

fn check_cancelled(ctx: &JobContext, program: &str, step: TrainingStep) -> Result<(), UnitError> {
    if ctx.is_cancelled() {
        return Err(UnitError::process(
            step,
            ProcessError::Cancelled {
                program: program.to_string(),
            },
        ));
    }
    Ok(())
}

fn outcome_label(e: &ProcessError) -> &'static str {
    match e {
        ProcessError::LaunchFailed { .. } => "launch_failed",
        ProcessError::Failed { .. } => "failed",
        ProcessError::Cancelled { .. } => "cancelled",
    }
}

#[async_trait]
impl BackgroundJob for UnitTrainingJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    fn cancelled_before_start(&self) {
        let (step, spec) = if self.probe.has_trained_model(&self.unit) {
            (TrainingStep::Generate, self.commands.generator(&self.unit))
        } else {
            (TrainingStep::Train, self.commands.trainer(&self.unit))
        };
        info!("{} cancelled before its pass started", self.unit);
        let e = UnitError::process(
            step,
            ProcessError::Cancelled {
                program: spec.program,
            },
        );
        self.registry.record_failure(&self.unit, e.to_failure());
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        match self.run_pass(ctx).await {
            Ok(report) => {
                debug!("Pass for {} done: {:?}", self.unit, report);
                Ok(())
            }
            Err(e) => {
                self.registry.record_failure(&self.unit, e.to_failure());
                if e.is_cancelled() {
                    return Err(JobError::Cancelled);
                }
                error!(
                    "Orchestration of {} failed ({}): {}",
                    self.unit,
                    if e.is_retryable() {
                        "retryable on restart"
                    } else {
                        "not retryable"
                    },
                    e
                );
                Err(JobError::ExecutionFailed(e.to_string()))
            }
        }
    }
}

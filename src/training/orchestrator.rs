use super::TrainingCommands;
use crate::background_jobs::jobs::UnitTrainingJob;
use crate::background_jobs::{create_scheduler, JobContext, JobScheduler, SchedulerHandle};
use crate::config::TrainingSettings;
use crate::corpus::{CorpusLayout, CorpusRegistry, CorpusStateProbe, UnitCatalog};
use crate::process::ProcessRunner;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Keeps every unit of the catalog trained and its pool topped up.
///
/// One background job per unit, all started together by [`start`] and
/// bounded by `max_concurrent_units`. Each job does a single pass, the pool
/// is refilled again on the next start.
///
/// [`start`]: TrainingOrchestrator::start
pub struct TrainingOrchestrator {
    catalog: UnitCatalog,
    probe: CorpusStateProbe,
    registry: CorpusRegistry,
    commands: Arc<TrainingCommands>,
    scheduler: Mutex<JobScheduler>,
    handle: SchedulerHandle,
    shutdown_token: CancellationToken,
    registered: AtomicBool,
    started: AtomicBool,
}

impl TrainingOrchestrator {
    pub fn new(
        catalog: UnitCatalog,
        layout: CorpusLayout,
        settings: TrainingSettings,
        working_dir: Option<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let slots = settings.effective_concurrency(catalog.len());
        let probe = CorpusStateProbe::new(layout.clone());
        let commands = Arc::new(TrainingCommands::new(layout, settings, working_dir));
        let job_context = JobContext::new(shutdown_token.child_token(), runner);
        let (scheduler, handle) =
            create_scheduler(shutdown_token.child_token(), job_context, slots);

        Self {
            catalog,
            probe,
            registry: CorpusRegistry::new(),
            commands,
            scheduler: Mutex::new(scheduler),
            handle,
            shutdown_token,
            registered: AtomicBool::new(false),
            started: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> CorpusRegistry {
        self.registry.clone()
    }

    pub fn scheduler_handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    pub fn catalog(&self) -> &UnitCatalog {
        &self.catalog
    }

    /// Rebuilds the registry from disk and launches one job per unit.
    /// Returns immediately. Only the first call does anything, and nothing
    /// is started after shutdown.
    pub async fn start(&self) -> usize {
        if self.shutdown_token.is_cancelled() {
            warn!("Training orchestrator already shut down, not starting");
            return 0;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return 0;
        }

        self.registry.rebuild(&self.catalog, &self.probe);
        let mut scheduler = self.scheduler.lock().await;
        self.register_jobs(&mut scheduler).await;
        let started = scheduler.start_all("startup").await;
        info!(
            "Training orchestrator started {} unit jobs ({} units in catalog)",
            started,
            self.catalog.len()
        );
        started
    }

    /// Runs one pass over every unit and waits for all of them.
    pub async fn run_pass(&self, triggered_by: &str) -> usize {
        if self.shutdown_token.is_cancelled() {
            return 0;
        }
        self.registry.rebuild(&self.catalog, &self.probe);
        let mut scheduler = self.scheduler.lock().await;
        self.register_jobs(&mut scheduler).await;
        let started = scheduler.start_all(triggered_by).await;
        scheduler.wait_all().await;
        started
    }

    /// Waits for the jobs launched by [`start`](Self::start).
    pub async fn wait(&self) {
        self.scheduler.lock().await.wait_all().await;
    }

    /// Cancels in-flight units, killing their subprocesses, and waits for
    /// them to stop.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        self.scheduler.lock().await.shutdown().await;
        info!("Training orchestrator stopped");
    }

    async fn register_jobs(&self, scheduler: &mut JobScheduler) {
        if self.registered.swap(true, Ordering::SeqCst) {
            return;
        }
        for unit in self.catalog.units() {
            let job = UnitTrainingJob::new(
                *unit,
                self.probe.clone(),
                self.registry.clone(),
                Arc::clone(&self.commands),
            );
            scheduler.register_job(Arc::new(job)).await;
        }
    }
}

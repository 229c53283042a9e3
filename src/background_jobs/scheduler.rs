use super::context::JobContext;
use super::handle::{JobRun, JobRunStatus, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, JobError, ShutdownBehavior};
use crate::server::metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const SHUTDOWN_WAIT: Duration = Duration::from_secs(30);

/// Runs registered jobs as tokio tasks, at most `max_concurrent_jobs` at a
/// time. Jobs beyond the bound are spawned but queue on a semaphore.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    /// Spawned jobs with their task handles
    running_handles: HashMap<String, JoinHandle<()>>,

    /// Cancellation tokens for each running job.
    job_cancel_tokens: HashMap<String, CancellationToken>,

    permits: Arc<Semaphore>,

    /// Once cancelled, no new job is started.
    shutdown_token: CancellationToken,

    /// Shared context provided to jobs during execution.
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        shutdown_token: CancellationToken,
        job_context: JobContext,
        max_concurrent_jobs: usize,
        shared_state: Arc<RwLock<SharedJobState>>,
    ) -> Self {
        Self {
            shared_state,
            running_handles: HashMap::new(),
            job_cancel_tokens: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            shutdown_token,
            job_context,
        }
    }

    /// Register a job with the scheduler.
    pub async fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        let job_id = job.id().to_string();
        debug!("Registering job: {} - {}", job_id, job.description());
        let mut state = self.shared_state.write().await;
        state.jobs.insert(job_id, job);
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Starts every registered job that is not already running. Returns how
    /// many were started.
    pub async fn start_all(&mut self, triggered_by: &str) -> usize {
        let mut job_ids: Vec<String> = {
            let state = self.shared_state.read().await;
            state.jobs.keys().cloned().collect()
        };
        job_ids.sort();

        let mut started = 0;
        for job_id in job_ids {
            match self.trigger_job(&job_id, triggered_by).await {
                Ok(()) => started += 1,
                Err(e) => debug!("Not starting {}: {}", job_id, e),
            }
        }
        started
    }

    pub async fn trigger_job(&mut self, job_id: &str, triggered_by: &str) -> Result<(), JobError> {
        if self.shutdown_token.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        self.cleanup_completed_jobs().await;

        {
            let state = self.shared_state.read().await;
            if !state.jobs.contains_key(job_id) {
                return Err(JobError::NotFound);
            }
            if state.running_jobs.contains(job_id) {
                return Err(JobError::AlreadyRunning);
            }
        }

        self.spawn_job(job_id, triggered_by).await;
        Ok(())
    }

    /// Waits until every spawned job has finished.
    pub async fn wait_all(&mut self) {
        for (job_id, handle) in self.running_handles.drain() {
            if let Err(e) = handle.await {
                error!("Job task {} failed to join: {}", job_id, e);
            }
        }
        self.job_cancel_tokens.clear();
    }

    /// Spawn a job execution task.
    async fn spawn_job(&mut self, job_id: &str, triggered_by: &str) {
        let job = {
            let state = self.shared_state.read().await;
            match state.jobs.get(job_id) {
                Some(job) => Arc::clone(job),
                None => {
                    error!("Attempted to spawn unknown job: {}", job_id);
                    return;
                }
            }
        };

        debug!("Queueing job: {} (triggered_by: {})", job_id, triggered_by);

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(job_id.to_string());
            state.last_runs.insert(
                job_id.to_string(),
                JobRun {
                    started_at: Utc::now(),
                    finished_at: None,
                    status: JobRunStatus::Queued,
                    error_message: None,
                    triggered_by: triggered_by.to_string(),
                },
            );
        }

        let cancel_token = self.job_context.cancellation_token.child_token();
        self.job_cancel_tokens
            .insert(job_id.to_string(), cancel_token.clone());
        let ctx = self.job_context.with_token(cancel_token);

        let permits = Arc::clone(&self.permits);
        let job_id_owned = job_id.to_string();
        let shared_state = Arc::clone(&self.shared_state);

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = permits.acquire_owned() => permit.ok(),
                _ = ctx.cancellation_token.cancelled() => None,
            };

            let start_time = Instant::now();
            let result = match permit {
                Some(permit) => {
                    info!("Starting job: {}", job_id_owned);
                    metrics::set_background_job_running(&job_id_owned, true);
                    Self::mark_running(&shared_state, &job_id_owned).await;
                    // a panicking job must not take the bookkeeping below with it
                    let result = tokio::spawn(async move { job.execute(&ctx).await }).await;
                    drop(permit);
                    result
                }
                None => {
                    job.cancelled_before_start();
                    Ok(Err(JobError::Cancelled))
                }
            };
            let elapsed = start_time.elapsed();

            let (status, error_msg, status_label) = match result {
                Ok(Ok(())) => {
                    info!(
                        "Job {} completed successfully in {:?}",
                        job_id_owned, elapsed
                    );
                    (JobRunStatus::Completed, None, "success")
                }
                Ok(Err(JobError::Cancelled)) => {
                    info!("Job {} was cancelled after {:?}", job_id_owned, elapsed);
                    (
                        JobRunStatus::Cancelled,
                        Some("Cancelled".to_string()),
                        "cancelled",
                    )
                }
                Ok(Err(e)) => {
                    error!("Job {} failed after {:?}: {}", job_id_owned, elapsed, e);
                    (JobRunStatus::Failed, Some(e.to_string()), "failed")
                }
                Err(e) => {
                    error!("Job {} panicked after {:?}: {}", job_id_owned, elapsed, e);
                    (
                        JobRunStatus::Failed,
                        Some(format!("Task panic: {}", e)),
                        "panic",
                    )
                }
            };

            metrics::record_background_job_execution(&job_id_owned, status_label, elapsed);
            metrics::set_background_job_running(&job_id_owned, false);

            let mut state = shared_state.write().await;
            state.running_jobs.remove(&job_id_owned);
            if let Some(run) = state.last_runs.get_mut(&job_id_owned) {
                run.finished_at = Some(Utc::now());
                run.status = status;
                run.error_message = error_msg;
            }
        });

        self.running_handles.insert(job_id.to_string(), handle);
    }

    async fn mark_running(shared_state: &RwLock<SharedJobState>, job_id: &str) {
        let mut state = shared_state.write().await;
        if let Some(run) = state.last_runs.get_mut(job_id) {
            run.started_at = Utc::now();
            run.status = JobRunStatus::Running;
        }
    }

    /// Clean up handles for completed jobs.
    async fn cleanup_completed_jobs(&mut self) {
        let completed: Vec<String> = self
            .running_handles
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in completed {
            if let Some(handle) = self.running_handles.remove(&job_id) {
                let _ = handle.await;
            }
            self.job_cancel_tokens.remove(&job_id);
        }
    }

    /// Stops accepting jobs, cancels the cancellable ones and waits for
    /// every job to finish, up to 30 seconds each.
    pub async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");
        self.shutdown_token.cancel();

        {
            let state = self.shared_state.read().await;
            for job_id in &state.running_jobs {
                if let Some(job) = state.jobs.get(job_id) {
                    if job.shutdown_behavior() == ShutdownBehavior::Cancellable {
                        if let Some(token) = self.job_cancel_tokens.get(job_id) {
                            debug!("Cancelling job: {}", job_id);
                            token.cancel();
                        }
                    }
                }
            }
        }

        let mut wait_jobs = Vec::new();
        for (job_id, handle) in self.running_handles.drain() {
            let behavior = {
                let state = self.shared_state.read().await;
                state
                    .jobs
                    .get(&job_id)
                    .map(|j| j.shutdown_behavior())
                    .unwrap_or_default()
            };
            wait_jobs.push((job_id, handle, behavior));
        }

        for (job_id, handle, behavior) in wait_jobs {
            if behavior == ShutdownBehavior::WaitForCompletion {
                info!("Waiting for job {} to complete...", job_id);
            }
            if tokio::time::timeout(SHUTDOWN_WAIT, handle).await.is_err() {
                warn!("Job {} did not stop within {:?}", job_id, SHUTDOWN_WAIT);
            }
        }

        self.job_cancel_tokens.clear();
        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    shutdown_token: CancellationToken,
    job_context: JobContext,
    max_concurrent_jobs: usize,
) -> (JobScheduler, SchedulerHandle) {
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let scheduler = JobScheduler::new(
        shutdown_token,
        job_context,
        max_concurrent_jobs,
        Arc::clone(&shared_state),
    );
    (scheduler, SchedulerHandle::new(shared_state))
}

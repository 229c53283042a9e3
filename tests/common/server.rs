//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own data directory and a
//! simulated toolchain in place of the trainer, generator and media tools.

use super::constants::*;
use super::fixtures::{create_data_dir, seed_generated_track};
use musicmind_server::config::{AppConfig, CliConfig};
use musicmind_server::corpus::{CorpusStateProbe, Genre};
use musicmind_server::media::{DeletionScheduler, MediaPipeline};
use musicmind_server::process::SimulatedProcessRunner;
use musicmind_server::server::{metrics, serve, RequestsLoggingLevel, ServerConfig, ServerState};
use musicmind_server::training::TrainingOrchestrator;
use musicmind_server::user::SqliteUserRecordStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance with an isolated data directory
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Base URL of the metrics listener
    pub metrics_url: String,

    /// Resolved configuration, for locating stores on disk
    pub config: AppConfig,

    /// The simulated toolchain, for inspecting invocations
    pub runner: Arc<SimulatedProcessRunner>,

    /// Present when the server was spawned with training
    pub orchestrator: Option<Arc<TrainingOrchestrator>>,

    // Private fields - keep resources alive until drop
    _temp_data_dir: TempDir,
    shutdown_token: CancellationToken,
}

impl TestServer {
    /// Spawns a server whose corpus already holds one track in
    /// `SEEDED_UNIT`. Training is disabled.
    pub async fn spawn() -> Self {
        Self::spawn_inner(false).await
    }

    /// Spawns a server over an empty corpus restricted to rock units, and
    /// runs one full training pass before returning.
    pub async fn spawn_with_training() -> Self {
        Self::spawn_inner(true).await
    }

    async fn spawn_inner(with_training: bool) -> Self {
        metrics::init_metrics();

        let temp_data_dir = create_data_dir().expect("Failed to create data dir");
        let cli = CliConfig {
            data_dir: Some(temp_data_dir.path().to_path_buf()),
            question_count: QUESTION_COUNT,
            disable_training: !with_training,
            ..Default::default()
        };
        let mut config = AppConfig::resolve(&cli, None).expect("Failed to resolve config");
        config.media.image_renderer_program = Some(IMAGE_RENDERER.to_string());
        config.media.compose_on_submit = false;
        config.training.target_pool_size = 1;
        if with_training {
            config.catalog = config.catalog.restricted_to(&[Genre::Rock]);
        } else {
            seed_generated_track(&config.paths.generated_tracks_dir, SEEDED_UNIT)
                .expect("Failed to seed corpus");
        }

        let runner = Arc::new(SimulatedProcessRunner::toolchain(
            &config.training.trainer_program,
            &config.training.generator_program,
            Some(IMAGE_RENDERER),
        ));

        let shutdown_token = CancellationToken::new();
        let user_store = Arc::new(
            SqliteUserRecordStore::new(config.user_db_path()).expect("Failed to open user store"),
        );
        let deletions = DeletionScheduler::new(&shutdown_token);
        let pipeline = Arc::new(MediaPipeline::new(
            &config,
            user_store,
            runner.clone(),
            deletions,
            shutdown_token.child_token(),
        ));

        let orchestrator = Arc::new(TrainingOrchestrator::new(
            config.catalog.clone(),
            config.corpus_layout(),
            config.training.clone(),
            config.paths.working_dir.clone(),
            runner.clone(),
            shutdown_token.child_token(),
        ));
        let scheduler_handle = if with_training {
            tokio::time::timeout(
                Duration::from_secs(TRAINING_TIMEOUT_SECS),
                orchestrator.run_pass("test"),
            )
            .await
            .expect("Training pass did not finish in time");
            Some(orchestrator.scheduler_handle())
        } else {
            orchestrator.registry().rebuild(
                orchestrator.catalog(),
                &CorpusStateProbe::new(config.corpus_layout()),
            );
            None
        };

        // Bind to random ports
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let metrics_listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind metrics to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let metrics_port = metrics_listener
            .local_addr()
            .expect("Failed to get metrics address")
            .port();

        let server_config = ServerConfig {
            requests_logging_level: RequestsLoggingLevel::None,
            port,
            metrics_port,
            frontend_dir_path: None,
        };
        let state = ServerState::new(
            server_config,
            pipeline,
            orchestrator.registry(),
            scheduler_handle,
        );

        // Spawn server in background task with graceful shutdown
        let server_token = shutdown_token.clone();
        tokio::spawn(async move {
            serve(state, listener, metrics_listener, server_token)
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            metrics_url: format!("http://127.0.0.1:{}", metrics_port),
            config,
            runner,
            orchestrator: with_training.then_some(orchestrator),
            _temp_data_dir: temp_data_dir,
            shutdown_token,
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the home endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => {
                    return;
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Stops the listeners, background jobs and deletion timers
        self.shutdown_token.cancel();
    }
}

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use musicmind_server::config::{self, AppConfig};
use musicmind_server::corpus::CorpusStateProbe;
use musicmind_server::media::{DeletionScheduler, MediaPipeline};
use musicmind_server::process::{ProcessRunner, SimulatedProcessRunner, TokioProcessRunner};
use musicmind_server::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use musicmind_server::training::TrainingOrchestrator;
use musicmind_server::user::SqliteUserRecordStore;

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML configuration file. Its values override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding models, generated tracks, media stores and the user
    /// database.
    #[clap(long, value_parser = parse_path)]
    pub data_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Number of answers a personality submission must carry.
    #[clap(long, default_value_t = 50)]
    pub question_count: usize,

    /// Path to the frontend directory to be statically served.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Maximum number of units trained concurrently. 0 means one slot per unit.
    #[clap(long)]
    pub max_concurrent_units: Option<usize>,

    /// Treat a non-zero trainer exit as success.
    #[clap(long)]
    pub lenient_trainer_exit: bool,

    /// Do not train models or generate tracks at startup.
    #[clap(long)]
    pub disable_training: bool,

    /// Replace every external program with an in-process simulator.
    #[clap(long)]
    pub simulate_tools: bool,
}

impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            data_dir: args.data_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            question_count: args.question_count,
            frontend_dir_path: args.frontend_dir_path.clone(),
            max_concurrent_units: args.max_concurrent_units,
            lenient_trainer_exit: args.lenient_trainer_exit,
            disable_training: args.disable_training,
        }
    }
}

fn make_runner(app_config: &AppConfig, simulate: bool) -> Arc<dyn ProcessRunner> {
    if simulate {
        warn!("Simulating external tools, no real models or media will be produced");
        Arc::new(SimulatedProcessRunner::toolchain(
            &app_config.training.trainer_program,
            &app_config.training.generator_program,
            app_config.media.image_renderer_program.as_deref(),
        ))
    } else {
        Arc::new(TokioProcessRunner)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  data_dir: {:?}", app_config.data_dir);
    info!("  port: {}", app_config.port);
    info!("  units: {}", app_config.catalog.len());
    info!("  training enabled: {}", app_config.training.enabled);

    info!("Initializing metrics...");
    metrics::init_metrics();

    if !app_config.user_db_path().exists() {
        info!(
            "Creating new user database at {:?}",
            app_config.user_db_path()
        );
    }
    let user_store = Arc::new(SqliteUserRecordStore::new(app_config.user_db_path())?);

    let runner = make_runner(&app_config, cli_args.simulate_tools);
    let shutdown_token = CancellationToken::new();
    let deletions = DeletionScheduler::new(&shutdown_token);

    let pipeline = Arc::new(MediaPipeline::new(
        &app_config,
        user_store,
        Arc::clone(&runner),
        deletions.clone(),
        shutdown_token.child_token(),
    ));

    let orchestrator = TrainingOrchestrator::new(
        app_config.catalog.clone(),
        app_config.corpus_layout(),
        app_config.training.clone(),
        app_config.paths.working_dir.clone(),
        runner,
        shutdown_token.child_token(),
    );

    let scheduler_handle = if app_config.training.enabled {
        let started = orchestrator.start().await;
        info!("Started {} unit training jobs", started);
        Some(orchestrator.scheduler_handle())
    } else {
        info!("Training disabled, serving the existing corpus");
        orchestrator.registry().rebuild(
            orchestrator.catalog(),
            &CorpusStateProbe::new(app_config.corpus_layout()),
        );
        None
    };

    let state = ServerState::new(
        ServerConfig::from_app_config(&app_config),
        Arc::clone(&pipeline),
        orchestrator.registry(),
        scheduler_handle,
    );

    let result = tokio::select! {
        result = run_server(state, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            Ok(())
        }
    };

    let removed = deletions.shutdown();
    shutdown_token.cancel();
    pipeline.shutdown().await;
    orchestrator.shutdown().await;
    info!("Shutdown complete, removed {} pending videos", removed);

    result
}

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use audio_transcriber::{
    config::Config,
    queue::{self, JobExecutor, JobStore, Worker},
    routes::create_router,
    storage::StagingArea,
    transcription::build_transcriber,
    utils::{init_logger, shutdown_token},
    AppState,
};

#[derive(Parser)]
#[command(name = "audio-transcriber", version, about = "Audio transcription service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Run a background worker against the shared job store
    Worker {
        /// Worker name; defaults to <host>-<pid>-<random>
        #[arg(long)]
        name: Option<String>,
        /// Drain the queue once and exit
        #[arg(long)]
        burst: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::from_env()?;

    let file_prefix = match cli.command {
        Some(Command::Worker { .. }) => "worker.log",
        _ => "server.log",
    };
    let _log_guard = init_logger(config.log_dir.as_deref(), file_prefix);
    info!("Configuration loaded: {:?}", config.server);

    if !config.transcription.has_api_key() {
        warn!("OPENAI_API_KEY is not set; every job will fail until it is configured");
    }

    let store = queue::connect(&config.redis).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, store).await,
        Command::Worker { name, burst } => {
            let worker = build_worker(&config, store, name)?;
            let shutdown = shutdown_token();
            if burst {
                let processed = worker.run_burst(shutdown).await?;
                info!(processed, "Burst run finished");
            } else {
                worker.run(shutdown).await;
            }
            Ok(())
        }
    }
}

fn build_worker(
    config: &Config,
    store: Arc<dyn JobStore>,
    name: Option<String>,
) -> anyhow::Result<Worker> {
    let transcriber = build_transcriber(&config.transcription)?;
    let id = name.unwrap_or_else(Worker::generate_id);
    Ok(Worker::new(
        id,
        store,
        JobExecutor::new(transcriber),
        config.worker.clone(),
    ))
}

async fn serve(config: Config, store: Arc<dyn JobStore>) -> anyhow::Result<()> {
    let staging = StagingArea::new(&config.server.upload_dir).with_context(|| {
        format!(
            "Failed to prepare upload folder {}",
            config.server.upload_dir.display()
        )
    })?;
    info!(path = %staging.root().display(), "Staging uploads");

    let shutdown = shutdown_token();

    // Without a shared store nothing else can see the queue, so work it here
    let embedded_worker = if queue::is_memory_store(&config.redis) {
        let worker = build_worker(&config, store.clone(), None)?;
        info!(worker_id = %worker.id(), "Starting embedded worker");
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        None
    };

    let state = AppState {
        store,
        staging,
        config: config.clone(),
    };
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", config.server.host, config.server.port))?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(stopped(shutdown))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    if let Some(handle) = embedded_worker {
        if let Err(e) = handle.await {
            error!("Embedded worker panicked: {}", e);
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn stopped(token: CancellationToken) {
    token.cancelled().await;
}

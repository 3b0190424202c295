//! Lektor worker (lektor-wk) - Main entry point
//!
//! Spawned by the coordinator's dispatcher (or by hand for debugging). All
//! coordination happens through the shared database; the worker holds no
//! state of its own between chunks.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lektor_common::config::{resolve_root_folder, RootLayout};
use lektor_common::db::init_database;
use lektor_common::params::SynthesisDefaults;
use lektor_common::store::JobStore;

use lektor_wk::client::ModelClient;
use lektor_wk::transcode::{FfmpegTranscoder, NullTranscoder, Transcoder};
use lektor_wk::worker::Worker;

/// Command-line arguments for lektor-wk
#[derive(Parser, Debug)]
#[command(name = "lektor-wk")]
#[command(about = "Lektor audiobook render worker")]
#[command(version)]
struct Args {
    /// Root folder for database, outputs and voices
    #[arg(short, long, env = "LEKTOR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Worker name (assigned by the dispatcher)
    #[arg(long, env = "LEKTOR_WORKER_NAME")]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lektor_wk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let name = args
        .name
        .unwrap_or_else(|| format!("wk-{}", std::process::id()));

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref().and_then(|p| p.to_str()),
        "LEKTOR_ROOT_FOLDER",
    )
    .context("Failed to resolve root folder")?;
    let layout = RootLayout::new(root_folder);

    let db = init_database(&layout.database_path())
        .await
        .context("Failed to initialize database")?;
    let store = JobStore::new(db);
    store
        .register_worker(&name, Some(std::process::id()))
        .await
        .context("Failed to register worker")?;

    // Model endpoints are read at startup; pipeline parameters are reloaded
    // per chunk inside the worker loop.
    let defaults = SynthesisDefaults::load(store.pool()).await?;
    let client = Arc::new(
        ModelClient::new(&defaults.model_server_url).context("Failed to build model client")?,
    );

    let transcoder: Arc<dyn Transcoder> = if FfmpegTranscoder::probe().await {
        Arc::new(FfmpegTranscoder)
    } else {
        warn!("ffmpeg not found on PATH, output will be plain WAV");
        Arc::new(NullTranscoder)
    };

    info!(
        worker = %name,
        model_server = %defaults.model_server_url,
        "worker starting"
    );

    let worker = Worker {
        store,
        layout,
        name,
        synthesizer: client.clone(),
        denoiser: client.clone(),
        stt: client,
        transcoder,
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    worker.run(shutdown_rx).await;
    info!("worker exited");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining"),
        _ = terminate => info!("Received terminate signal, draining"),
    }
}

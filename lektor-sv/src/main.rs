//! Lektor coordinator (lektor-sv) - Main entry point
//!
//! Owns the job store, supervises the worker process pool, and serves the
//! control API for the UI.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lektor_common::config::{resolve_root_folder, RootLayout};
use lektor_common::db::init_database;

use lektor_common::store::JobStore;
use lektor_sv::api;
use lektor_sv::dispatch::{run_monitor, Supervisor};

/// Command-line arguments for lektor-sv
#[derive(Parser, Debug)]
#[command(name = "lektor-sv")]
#[command(about = "Lektor audiobook render coordinator")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8770", env = "LEKTOR_SV_PORT")]
    port: u16,

    /// Root folder for database, outputs and voices
    #[arg(short, long, env = "LEKTOR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Path of the worker binary to spawn (defaults to lektor-wk beside this
    /// executable, falling back to PATH lookup)
    #[arg(long, env = "LEKTOR_WORKER_BINARY")]
    worker_binary: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lektor_sv=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let root_folder = resolve_root_folder(
        args.root_folder.as_deref().and_then(|p| p.to_str()),
        "LEKTOR_ROOT_FOLDER",
    )
    .context("Failed to resolve root folder")?;
    info!("Root folder: {}", root_folder.display());

    let layout = Arc::new(RootLayout::new(root_folder.clone()));
    std::fs::create_dir_all(layout.outputs_dir()).context("Failed to create outputs dir")?;
    std::fs::create_dir_all(layout.voices_dir()).context("Failed to create voices dir")?;

    let db = init_database(&layout.database_path())
        .await
        .context("Failed to initialize database")?;
    let store = JobStore::new(db);

    let (events, _) = broadcast::channel(256);
    let (shutdown_tx, _) = broadcast::channel(1);

    // Worker pool supervisor
    let worker_binary = args
        .worker_binary
        .or_else(|| {
            std::env::current_exe()
                .ok()
                .map(|p| p.with_file_name("lektor-wk"))
                .filter(|p| p.exists())
        })
        .unwrap_or_else(|| PathBuf::from("lektor-wk"));
    info!("Worker binary: {}", worker_binary.display());

    let supervisor = Supervisor::new(
        store.clone(),
        worker_binary,
        root_folder.clone(),
        events.clone(),
    );
    tokio::spawn(supervisor.run(shutdown_tx.subscribe()));
    tokio::spawn(run_monitor(
        store.clone(),
        events.clone(),
        shutdown_tx.subscribe(),
    ));

    // Build the application router
    let ctx = api::AppContext {
        store,
        layout,
        events,
    };
    let app = api::create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }

    let _ = shutdown_tx.send(());
}

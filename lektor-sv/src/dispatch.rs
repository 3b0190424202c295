//! Worker pool supervision
//!
//! The dispatcher bridges the job store and the pool of worker OS processes.
//! It runs an explicit control loop comparing the desired worker count (a
//! runtime-adjustable setting) against the live children: too few spawns new
//! `lektor-wk` processes, too many marks the excess for drain so they finish
//! their current claim and exit instead of being killed mid-chunk. The same
//! loop reclaims orphaned claims whose heartbeat went silent.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use lektor_common::db::settings;
use lektor_common::events::LektorEvent;
use lektor_common::model::JobStatus;
use lektor_common::store::JobStore;
use lektor_common::Result;

/// How often the supervisor compares desired vs. actual workers.
const SUPERVISE_INTERVAL: Duration = Duration::from_secs(2);
/// How often active job progress is broadcast to SSE subscribers.
const MONITOR_INTERVAL: Duration = Duration::from_secs(1);

pub struct Supervisor {
    store: JobStore,
    /// Path of the worker binary to spawn
    worker_binary: PathBuf,
    /// Root folder passed through to workers
    root_folder: PathBuf,
    children: HashMap<String, Child>,
    events: broadcast::Sender<LektorEvent>,
}

impl Supervisor {
    pub fn new(
        store: JobStore,
        worker_binary: PathBuf,
        root_folder: PathBuf,
        events: broadcast::Sender<LektorEvent>,
    ) -> Self {
        Self {
            store,
            worker_binary,
            root_folder,
            children: HashMap::new(),
            events,
        }
    }

    /// Run the control loop until the shutdown signal fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut tick = tokio::time::interval(SUPERVISE_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if let Err(e) = self.supervise().await {
                        error!("supervisor tick failed: {e}");
                    }
                }
                _ = shutdown.recv() => {
                    info!("supervisor shutting down, draining {} workers", self.children.len());
                    for name in self.children.keys() {
                        let _ = self.store.request_drain(name).await;
                    }
                    break;
                }
            }
        }
    }

    async fn supervise(&mut self) -> Result<()> {
        self.reap_exited().await;

        let desired = settings::get_desired_workers(self.store.pool()).await?;
        let live = self.children.len();

        if live < desired {
            for _ in live..desired {
                self.spawn_worker().await?;
            }
            let _ = self.events.send(LektorEvent::WorkerPoolResized {
                desired,
                live: self.children.len(),
                timestamp: Utc::now(),
            });
        } else if live > desired {
            // Drain the newest workers first; they exit after their current
            // claim completes and are reaped on a later tick.
            let mut names: Vec<String> = self.children.keys().cloned().collect();
            names.sort();
            for name in names.iter().rev().take(live - desired) {
                info!(worker = %name, "requesting drain");
                self.store.request_drain(name).await?;
            }
            let _ = self.events.send(LektorEvent::WorkerPoolResized {
                desired,
                live,
                timestamp: Utc::now(),
            });
        }

        // Claims whose worker stopped heartbeating go back to pending with
        // their retry count untouched.
        let timeout = settings::get_claim_timeout_secs(self.store.pool()).await?;
        let reclaimed = self.store.reclaim_orphans(timeout).await?;
        if reclaimed > 0 {
            warn!(reclaimed, "returned orphaned chunks to pending");
        }
        Ok(())
    }

    async fn reap_exited(&mut self) {
        let mut exited = Vec::new();
        for (name, child) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(worker = %name, %status, "worker exited");
                    exited.push(name.clone());
                }
                Ok(None) => {}
                Err(e) => {
                    error!(worker = %name, "failed to poll worker: {e}");
                    exited.push(name.clone());
                }
            }
        }
        for name in exited {
            self.children.remove(&name);
            let _ = self.store.remove_worker(&name).await;
        }
    }

    async fn spawn_worker(&mut self) -> Result<()> {
        let name = format!("wk-{}", &Uuid::new_v4().to_string()[..8]);
        let child = Command::new(&self.worker_binary)
            .arg("--root-folder")
            .arg(&self.root_folder)
            .env("LEKTOR_WORKER_NAME", &name)
            .kill_on_drop(false)
            .spawn()?;

        self.store.register_worker(&name, child.id()).await?;
        info!(worker = %name, pid = ?child.id(), "spawned worker");
        self.children.insert(name, child);
        Ok(())
    }
}

/// Periodic progress monitor: broadcasts snapshots of active jobs for the
/// SSE stream.
pub async fn run_monitor(
    store: JobStore,
    events: broadcast::Sender<LektorEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(MONITOR_INTERVAL);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if events.receiver_count() == 0 {
                    continue;
                }
                match store.list_snapshots().await {
                    Ok(snapshots) => {
                        for snapshot in snapshots
                            .iter()
                            .filter(|s| s.status == JobStatus::Processing)
                        {
                            let _ = events.send(LektorEvent::JobProgress {
                                job_id: snapshot.job_id.clone(),
                                progress: snapshot.progress,
                                current_chapter: snapshot.current_chapter,
                                total_chapters: snapshot.total_chapters,
                                timestamp: Utc::now(),
                            });
                        }
                    }
                    Err(e) => error!("progress monitor query failed: {e}"),
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

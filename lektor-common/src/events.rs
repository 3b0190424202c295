//! Event types for the lektor event system
//!
//! Emitted by the coordinator's monitor and broadcast to SSE subscribers.

use serde::{Deserialize, Serialize};

use crate::model::{JobSnapshot, JobStatus};

/// Lektor event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LektorEvent {
    /// Job status changed
    JobStatusChanged {
        job_id: String,
        status: JobStatus,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Progress update for an active job (sent periodically)
    JobProgress {
        job_id: String,
        progress: u8,
        current_chapter: i64,
        total_chapters: i64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Full snapshot sent on SSE connection
    InitialState {
        jobs: Vec<JobSnapshot>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Worker pool size changed
    WorkerPoolResized {
        desired: usize,
        live: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

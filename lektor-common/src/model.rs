//! Job / chapter / chunk data model
//!
//! The unit-of-work hierarchy is job -> chapter -> chunk. All rows live in the
//! shared SQLite database and are mutated only through the coordinator's job
//! store, which serializes writes per record.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Overall job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Legal transition table for the job state machine.
    ///
    /// `queued -> processing` on first claim, `processing <-> paused`,
    /// `processing -> completed | failed`, and any non-terminal state may be
    /// cancelled. Pause from `queued` is rejected (nothing to freeze yet).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Processing)
                | (Processing, Paused)
                | (Paused, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Paused, Failed)
                | (Queued, Cancelled)
                | (Processing, Cancelled)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "processing" => Ok(JobStatus::Processing),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::Internal(format!("unknown job status: {other}"))),
        }
    }
}

/// Chapter / chunk work-item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Pending => "pending",
            WorkStatus::Processing => "processing",
            WorkStatus::Completed => "completed",
            WorkStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkStatus::Pending),
            "processing" => Ok(WorkStatus::Processing),
            "completed" => Ok(WorkStatus::Completed),
            "failed" => Ok(WorkStatus::Failed),
            other => Err(Error::Internal(format!("unknown work status: {other}"))),
        }
    }
}

/// Per-speaker voice assignment: reference voice plus optional effects.
///
/// The speaker name maps to a reference audio id understood by the TTS model
/// server. Speed is a time-scaling factor (1.0 = unchanged).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceAssignment {
    /// Reference voice id (file name under the voices folder)
    #[serde(default)]
    pub voice: Option<String>,
    /// Language code for synthesis (falls back to the job default)
    #[serde(default)]
    pub language: Option<String>,
    /// Optional playback speed factor applied after synthesis
    #[serde(default)]
    pub speed_factor: Option<f32>,
}

/// Voice assignment table: speaker name -> assignment.
pub type VoiceAssignments = HashMap<String, VoiceAssignment>;

/// A newly-segmented chunk, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub speaker: String,
    pub text: String,
}

/// A newly-segmented chapter: ordered chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSpec {
    pub chunks: Vec<ChunkSpec>,
}

/// Job submission payload, as accepted by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub text: String,
    /// Pre-split chapter texts; when empty the whole text is one chapter
    #[serde(default)]
    pub chapters: Vec<String>,
    #[serde(default)]
    pub voice_assignments: VoiceAssignments,
    #[serde(default = "default_output_format")]
    pub output_format: String,
    #[serde(default = "default_output_bitrate")]
    pub output_bitrate_kbps: u32,
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_output_bitrate() -> u32 {
    128
}

/// A chunk as claimed by a worker: everything needed to synthesize it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedChunk {
    pub job_id: String,
    pub chapter_index: i64,
    pub chunk_index: i64,
    pub speaker: String,
    pub text: String,
    pub retry_count: i64,
    pub voice_assignments: VoiceAssignments,
    pub output_format: String,
    pub output_bitrate_kbps: u32,
}

/// Outcome a worker reports for a claimed chunk.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// Chunk audio written to `artifact_path`
    Success { artifact_path: String },
    /// Synthesis or pipeline failure with a human-readable cause
    Failure { error: String },
}

/// Per-chapter state as exposed in job snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterState {
    pub chapter_index: i64,
    pub status: WorkStatus,
    pub current_chunk: i64,
    pub total_chunks: i64,
    pub worker_name: Option<String>,
}

/// Read-only job view consumed by the UI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub title: String,
    pub status: JobStatus,
    pub progress: u8,
    pub current_chunk: i64,
    pub total_chunks: i64,
    pub current_chapter: i64,
    pub total_chapters: i64,
    pub completed_chapters: i64,
    pub chapter_states: Vec<ChapterState>,
    pub output_files: Vec<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// Overall percent complete for a job.
///
/// Completed chapters count as whole units; each currently-processing chapter
/// contributes its fractional `current_chunk / total_chunks`. The result is
/// floored and capped at 99 until the job itself is `completed` — 100 is
/// reported only for a completed job.
pub fn job_progress(status: JobStatus, chapters: &[ChapterState]) -> u8 {
    if status == JobStatus::Completed {
        return 100;
    }
    let total = chapters.len() as f64;
    if total == 0.0 {
        return 0;
    }
    let completed = chapters
        .iter()
        .filter(|c| c.status == WorkStatus::Completed)
        .count() as f64;
    let running: f64 = chapters
        .iter()
        .filter(|c| c.status == WorkStatus::Processing && c.total_chunks > 0)
        .map(|c| c.current_chunk as f64 / c.total_chunks as f64)
        .sum();
    let percent = ((completed + running) / total * 100.0).floor() as i64;
    percent.clamp(0, 99) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapter(status: WorkStatus, current: i64, total: i64) -> ChapterState {
        ChapterState {
            chapter_index: 0,
            status,
            current_chunk: current,
            total_chunks: total,
            worker_name: None,
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Paused,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        for status in [
            WorkStatus::Pending,
            WorkStatus::Processing,
            WorkStatus::Completed,
            WorkStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<WorkStatus>().unwrap(), status);
        }
    }

    #[test]
    fn terminal_states_accept_no_transitions() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Queued,
                JobStatus::Processing,
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} should be illegal"
                );
            }
        }
    }

    #[test]
    fn pause_resume_cycle_is_legal() {
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Paused));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Processing));
        assert!(!JobStatus::Queued.can_transition_to(JobStatus::Paused));
    }

    #[test]
    fn cancel_is_legal_from_all_non_terminal_states() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn progress_matches_worked_example() {
        // T=3 chapters, C=1 completed, one processing at 2/4:
        // floor((1 + 0.5) / 3 * 100) = 50
        let chapters = vec![
            chapter(WorkStatus::Completed, 4, 4),
            chapter(WorkStatus::Processing, 2, 4),
            chapter(WorkStatus::Pending, 0, 4),
        ];
        assert_eq!(job_progress(JobStatus::Processing, &chapters), 50);
    }

    #[test]
    fn progress_floors_instead_of_rounding() {
        // 2/3 of one chapter out of two: floor(33.33..) = 33
        let chapters = vec![
            chapter(WorkStatus::Processing, 2, 3),
            chapter(WorkStatus::Pending, 0, 3),
        ];
        assert_eq!(job_progress(JobStatus::Processing, &chapters), 33);
    }

    #[test]
    fn progress_is_capped_at_99_until_completed() {
        // Every chapter done but the job not yet transitioned: cap at 99.
        let chapters = vec![chapter(WorkStatus::Completed, 4, 4)];
        assert_eq!(job_progress(JobStatus::Processing, &chapters), 99);
        assert_eq!(job_progress(JobStatus::Completed, &chapters), 100);
    }

    #[test]
    fn progress_of_empty_job_is_zero() {
        assert_eq!(job_progress(JobStatus::Queued, &[]), 0);
    }

    #[test]
    fn progress_ignores_processing_chapter_with_zero_chunks() {
        let chapters = vec![chapter(WorkStatus::Processing, 0, 0)];
        assert_eq!(job_progress(JobStatus::Processing, &chapters), 0);
    }

    #[test]
    fn voice_assignment_deserializes_with_missing_fields() {
        let va: VoiceAssignment = serde_json::from_str(r#"{"voice": "anna.wav"}"#).unwrap();
        assert_eq!(va.voice.as_deref(), Some("anna.wav"));
        assert!(va.language.is_none());
        assert!(va.speed_factor.is_none());
    }
}

//! Job store: the single source of truth for job/chapter/chunk state
//!
//! Every mutation of the work hierarchy goes through this module so the §3
//! invariants hold under concurrent worker processes. All writes are
//! serialized per record through SQLite transactions; the claim path uses a
//! single conditional UPDATE so no two live claims can ever cover one chunk.

use chrono::{Duration, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{
    job_progress, ChapterSpec, ChapterState, ChunkOutcome, ClaimedChunk, JobRequest, JobSnapshot,
    JobStatus, VoiceAssignments, WorkStatus,
};
use crate::params::RetryPolicy;
use crate::{Error, Result};

/// RFC 3339 with fixed precision, so stored timestamps order lexicographically.
fn now_str() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Acknowledgement returned to the worker that reported a chunk result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportAck {
    /// Success recorded. `chapter_completed` asks the reporting worker to
    /// assemble the chapter; `all_chapters_completed` to assemble the job.
    Recorded {
        chapter_completed: bool,
        all_chapters_completed: bool,
    },
    /// Failure recorded; the chunk returned to pending for another attempt.
    RetryScheduled { attempt: u32 },
    /// Failure recorded; retries exhausted, chunk/chapter/job marked failed.
    JobFailed,
    /// The job was cancelled or deleted while the chunk was in flight; the
    /// result is discarded.
    Discarded,
}

#[derive(Clone)]
pub struct JobStore {
    db: SqlitePool,
}

impl JobStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // ------------------------------------------------------------------
    // Job lifecycle
    // ------------------------------------------------------------------

    /// Persist a job with its chapters and chunks atomically.
    ///
    /// Everything starts `pending`/`queued`. Fails with `InvalidInput` when
    /// segmentation produced no chunks.
    pub async fn create(&self, request: &JobRequest, chapters: &[ChapterSpec]) -> Result<String> {
        let total_chunks: usize = chapters.iter().map(|c| c.chunks.len()).sum();
        if total_chunks == 0 {
            return Err(Error::InvalidInput("job has no chunks".to_string()));
        }

        let job_id = Uuid::new_v4().to_string();
        let title = request
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "Untitled project".to_string());
        let now = now_str();
        let assignments = serde_json::to_string(&request.voice_assignments)
            .map_err(|e| Error::Internal(format!("serialize voice assignments: {e}")))?;

        let mut tx = self.db.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (
                job_id, title, status, output_format, output_bitrate_kbps,
                voice_assignments, total_chapters, created_at
            ) VALUES (?, ?, 'queued', ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job_id)
        .bind(&title)
        .bind(&request.output_format)
        .bind(request.output_bitrate_kbps as i64)
        .bind(&assignments)
        .bind(chapters.len() as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for (chapter_index, chapter) in chapters.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chapters (job_id, chapter_index, status, total_chunks, updated_at)
                VALUES (?, ?, 'pending', ?, ?)
                "#,
            )
            .bind(&job_id)
            .bind(chapter_index as i64)
            .bind(chapter.chunks.len() as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            for (chunk_index, chunk) in chapter.chunks.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO chunks (job_id, chapter_index, chunk_index, speaker, text, status)
                    VALUES (?, ?, ?, ?, ?, 'pending')
                    "#,
                )
                .bind(&job_id)
                .bind(chapter_index as i64)
                .bind(chunk_index as i64)
                .bind(&chunk.speaker)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;

        info!(
            job_id = %job_id,
            chapters = chapters.len(),
            chunks = total_chunks,
            "created job"
        );
        Ok(job_id)
    }

    pub async fn status(&self, job_id: &str) -> Result<JobStatus> {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.db)
            .await?;
        status
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?
            .parse()
    }

    /// Enforce the legal job state machine.
    ///
    /// The update is conditional on the status the check was made against, so
    /// a concurrent transition cannot slip an illegal edge through.
    pub async fn transition(&self, job_id: &str, new_status: JobStatus) -> Result<JobStatus> {
        let current = self.status(job_id).await?;
        if !current.can_transition_to(new_status) {
            return Err(Error::IllegalTransition {
                from: current,
                to: new_status,
            });
        }

        let now = now_str();
        let set_started = new_status == JobStatus::Processing;
        let set_completed = new_status.is_terminal();
        let rows = sqlx::query(
            r#"
            UPDATE jobs SET
                status = ?,
                started_at = CASE WHEN ? AND started_at IS NULL THEN ? ELSE started_at END,
                completed_at = CASE WHEN ? THEN ? ELSE completed_at END
            WHERE job_id = ? AND status = ?
            "#,
        )
        .bind(new_status.as_str())
        .bind(set_started)
        .bind(&now)
        .bind(set_completed)
        .bind(&now)
        .bind(job_id)
        .bind(current.as_str())
        .execute(&self.db)
        .await?
        .rows_affected();

        if rows == 0 {
            let actual = self.status(job_id).await?;
            return Err(Error::IllegalTransition {
                from: actual,
                to: new_status,
            });
        }
        info!(job_id = %job_id, from = %current, to = %new_status, "job transition");
        Ok(new_status)
    }

    /// Pause: freezes new claims; in-flight chunks are allowed to finish.
    pub async fn pause(&self, job_id: &str) -> Result<JobStatus> {
        self.transition(job_id, JobStatus::Paused).await
    }

    /// Resume re-enables claiming for this job only.
    pub async fn resume(&self, job_id: &str) -> Result<JobStatus> {
        self.transition(job_id, JobStatus::Processing).await
    }

    /// Cancel: no further claims; in-flight results will be discarded.
    pub async fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        self.transition(job_id, JobStatus::Cancelled).await
    }

    /// Remove a job and all of its sub-state. Returns false when absent.
    pub async fn delete(&self, job_id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM claims WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        let rows = sqlx::query("DELETE FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(rows > 0)
    }

    /// Record the final artifact list and complete the job.
    pub async fn complete_job(&self, job_id: &str, output_files: &[String]) -> Result<()> {
        let files = serde_json::to_string(output_files)
            .map_err(|e| Error::Internal(format!("serialize output files: {e}")))?;
        sqlx::query("UPDATE jobs SET output_files = ? WHERE job_id = ?")
            .bind(&files)
            .bind(job_id)
            .execute(&self.db)
            .await?;
        // A job paused after its last in-flight chunk still finishes: step
        // back to processing first so the transition stays on legal edges.
        if self.status(job_id).await? == JobStatus::Paused {
            self.transition(job_id, JobStatus::Processing).await?;
        }
        self.transition(job_id, JobStatus::Completed).await?;
        Ok(())
    }

    async fn fail_job(&self, job_id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE jobs SET error = ? WHERE job_id = ?")
            .bind(error)
            .bind(job_id)
            .execute(&self.db)
            .await?;
        self.transition(job_id, JobStatus::Failed).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Claims
    // ------------------------------------------------------------------

    /// Atomically claim the next pending chunk for a worker.
    ///
    /// Selection order: lowest chapter index, then lowest chunk index, across
    /// jobs that are `queued` or `processing`. Chapters that already have a
    /// live claim are skipped (one worker per chapter), as are chunks whose
    /// retry backoff has not elapsed. Claiming the first chunk of a queued
    /// job moves the job to `processing`.
    pub async fn claim_next_chunk(&self, worker_name: &str) -> Result<Option<ClaimedChunk>> {
        let now = now_str();
        let mut tx = self.db.begin().await?;

        // The conditional UPDATE is the claim: once a row flips to
        // `processing` no competing subquery can select it again.
        let claimed = sqlx::query(
            r#"
            UPDATE chunks SET status = 'processing'
            WHERE (job_id, chapter_index, chunk_index) IN (
                SELECT c.job_id, c.chapter_index, c.chunk_index
                FROM chunks c
                JOIN jobs j ON j.job_id = c.job_id
                WHERE c.status = 'pending'
                  AND j.status IN ('queued', 'processing')
                  AND (c.not_before IS NULL OR c.not_before <= ?)
                  AND NOT EXISTS (
                      SELECT 1 FROM claims cl
                      WHERE cl.job_id = c.job_id AND cl.chapter_index = c.chapter_index
                  )
                ORDER BY c.chapter_index, c.chunk_index, c.job_id
                LIMIT 1
            )
            RETURNING job_id, chapter_index, chunk_index, speaker, text, retry_count
            "#,
        )
        .bind(&now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = claimed else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job_id: String = row.get("job_id");
        let chapter_index: i64 = row.get("chapter_index");
        let chunk_index: i64 = row.get("chunk_index");
        let speaker: String = row.get("speaker");
        let text: String = row.get("text");
        let retry_count: i64 = row.get("retry_count");

        sqlx::query(
            r#"
            INSERT INTO claims (job_id, chapter_index, chunk_index, worker_name, claimed_at, heartbeat_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job_id)
        .bind(chapter_index)
        .bind(chunk_index)
        .bind(worker_name)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE chapters SET
                status = 'processing',
                worker_name = ?,
                current_chunk = ?,
                updated_at = ?
            WHERE job_id = ? AND chapter_index = ?
            "#,
        )
        .bind(worker_name)
        .bind(chunk_index + 1)
        .bind(&now)
        .bind(&job_id)
        .bind(chapter_index)
        .execute(&mut *tx)
        .await?;

        // First claim of a queued job starts it.
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'processing',
                started_at = COALESCE(started_at, ?)
            WHERE job_id = ? AND status = 'queued'
            "#,
        )
        .bind(&now)
        .bind(&job_id)
        .execute(&mut *tx)
        .await?;

        let job_row = sqlx::query(
            "SELECT voice_assignments, output_format, output_bitrate_kbps FROM jobs WHERE job_id = ?",
        )
        .bind(&job_id)
        .fetch_one(&mut *tx)
        .await?;
        let assignments: String = job_row.get("voice_assignments");
        let output_format: String = job_row.get("output_format");
        let output_bitrate_kbps: i64 = job_row.get("output_bitrate_kbps");

        tx.commit().await?;

        let voice_assignments: VoiceAssignments = serde_json::from_str(&assignments)
            .map_err(|e| Error::Internal(format!("parse voice assignments: {e}")))?;

        Ok(Some(ClaimedChunk {
            job_id,
            chapter_index,
            chunk_index,
            speaker,
            text,
            retry_count,
            voice_assignments,
            output_format,
            output_bitrate_kbps: output_bitrate_kbps as u32,
        }))
    }

    /// Refresh a live claim's heartbeat.
    pub async fn heartbeat(
        &self,
        job_id: &str,
        chapter_index: i64,
        chunk_index: i64,
        worker_name: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE claims SET heartbeat_at = ?
            WHERE job_id = ? AND chapter_index = ? AND chunk_index = ? AND worker_name = ?
            "#,
        )
        .bind(now_str())
        .bind(job_id)
        .bind(chapter_index)
        .bind(chunk_index)
        .bind(worker_name)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Return chunks whose claims have missed their heartbeat to `pending`.
    ///
    /// A crash is not a content failure: the retry count is untouched and no
    /// backoff applies. Returns the number of reclaimed chunks.
    pub async fn reclaim_orphans(&self, timeout_secs: u64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::seconds(timeout_secs as i64))
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let rows = sqlx::query(
            "SELECT job_id, chapter_index, chunk_index, worker_name FROM claims WHERE heartbeat_at < ?",
        )
        .bind(&cutoff)
        .fetch_all(&self.db)
        .await?;

        let mut reclaimed = 0usize;
        for row in rows {
            let job_id: String = row.get("job_id");
            let chapter_index: i64 = row.get("chapter_index");
            let chunk_index: i64 = row.get("chunk_index");
            let worker_name: String = row.get("worker_name");

            let mut tx = self.db.begin().await?;
            sqlx::query(
                "DELETE FROM claims WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?",
            )
            .bind(&job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE chunks SET status = 'pending'
                WHERE job_id = ? AND chapter_index = ? AND chunk_index = ? AND status = 'processing'
                "#,
            )
            .bind(&job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE chapters SET status = 'pending', worker_name = NULL, updated_at = ?
                WHERE job_id = ? AND chapter_index = ? AND status = 'processing'
                "#,
            )
            .bind(now_str())
            .bind(&job_id)
            .bind(chapter_index)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            warn!(
                job_id = %job_id,
                chapter = chapter_index,
                chunk = chunk_index,
                worker = %worker_name,
                "reclaimed orphaned claim"
            );
            reclaimed += 1;
        }
        Ok(reclaimed)
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Record a worker's chunk outcome and propagate completion or failure.
    pub async fn report_chunk_result(
        &self,
        job_id: &str,
        chapter_index: i64,
        chunk_index: i64,
        outcome: ChunkOutcome,
        retry: &RetryPolicy,
    ) -> Result<ReportAck> {
        let job_status = match self.status(job_id).await {
            Ok(status) => status,
            Err(Error::NotFound(_)) => return Ok(ReportAck::Discarded),
            Err(e) => return Err(e),
        };

        // Results landing after a cancel are discarded, not recorded.
        if job_status == JobStatus::Cancelled {
            sqlx::query(
                "DELETE FROM claims WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?",
            )
            .bind(job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&self.db)
            .await?;
            sqlx::query(
                r#"
                UPDATE chunks SET status = 'pending'
                WHERE job_id = ? AND chapter_index = ? AND chunk_index = ? AND status = 'processing'
                "#,
            )
            .bind(job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&self.db)
            .await?;
            return Ok(ReportAck::Discarded);
        }

        match outcome {
            ChunkOutcome::Success { artifact_path } => {
                self.record_success(job_id, chapter_index, chunk_index, &artifact_path)
                    .await
            }
            ChunkOutcome::Failure { error } => {
                self.record_failure(job_id, chapter_index, chunk_index, &error, retry)
                    .await
            }
        }
    }

    async fn record_success(
        &self,
        job_id: &str,
        chapter_index: i64,
        chunk_index: i64,
        artifact_path: &str,
    ) -> Result<ReportAck> {
        let now = now_str();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            UPDATE chunks SET status = 'completed', artifact_path = ?, error = NULL
            WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?
            "#,
        )
        .bind(artifact_path)
        .bind(job_id)
        .bind(chapter_index)
        .bind(chunk_index)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM claims WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?")
            .bind(job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;

        // Chapter completion is derived from chunk statuses, not from which
        // chunk finished last; retries can complete out of order.
        let remaining: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks
            WHERE job_id = ? AND chapter_index = ? AND status != 'completed'
            "#,
        )
        .bind(job_id)
        .bind(chapter_index)
        .fetch_one(&mut *tx)
        .await?;

        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE job_id = ? AND chapter_index = ? AND status = 'completed'",
        )
        .bind(job_id)
        .bind(chapter_index)
        .fetch_one(&mut *tx)
        .await?;

        let chapter_completed = remaining == 0;
        if chapter_completed {
            sqlx::query(
                r#"
                UPDATE chapters SET
                    status = 'completed', completed_chunks = ?, current_chunk = ?, updated_at = ?
                WHERE job_id = ? AND chapter_index = ?
                "#,
            )
            .bind(completed)
            .bind(completed)
            .bind(&now)
            .bind(job_id)
            .bind(chapter_index)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE jobs SET completed_chapters = (
                    SELECT COUNT(*) FROM chapters
                    WHERE job_id = ? AND status = 'completed'
                ) WHERE job_id = ?
                "#,
            )
            .bind(job_id)
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE chapters SET completed_chunks = ?, updated_at = ?
                WHERE job_id = ? AND chapter_index = ?
                "#,
            )
            .bind(completed)
            .bind(&now)
            .bind(job_id)
            .bind(chapter_index)
            .execute(&mut *tx)
            .await?;
        }

        let all_chapters_completed: bool = if chapter_completed {
            let open: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM chapters WHERE job_id = ? AND status != 'completed'",
            )
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;
            open == 0
        } else {
            false
        };

        tx.commit().await?;
        Ok(ReportAck::Recorded {
            chapter_completed,
            all_chapters_completed,
        })
    }

    async fn record_failure(
        &self,
        job_id: &str,
        chapter_index: i64,
        chunk_index: i64,
        error: &str,
        retry: &RetryPolicy,
    ) -> Result<ReportAck> {
        let mut tx = self.db.begin().await?;

        sqlx::query("DELETE FROM claims WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?")
            .bind(job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;

        let attempts: i64 = sqlx::query_scalar(
            "SELECT retry_count FROM chunks WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?",
        )
        .bind(job_id)
        .bind(chapter_index)
        .bind(chunk_index)
        .fetch_one(&mut *tx)
        .await?;
        let attempt = attempts as u32 + 1;

        if attempt < retry.max_attempts {
            let not_before = (Utc::now() + Duration::milliseconds(retry.backoff_ms(attempt) as i64))
                .to_rfc3339_opts(SecondsFormat::Micros, true);
            sqlx::query(
                r#"
                UPDATE chunks SET status = 'pending', retry_count = ?, error = ?, not_before = ?
                WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?
                "#,
            )
            .bind(attempt as i64)
            .bind(error)
            .bind(&not_before)
            .bind(job_id)
            .bind(chapter_index)
            .bind(chunk_index)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                r#"
                UPDATE chapters SET status = 'pending', worker_name = NULL, updated_at = ?
                WHERE job_id = ? AND chapter_index = ? AND status = 'processing'
                "#,
            )
            .bind(now_str())
            .bind(job_id)
            .bind(chapter_index)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            warn!(
                job_id = %job_id,
                chapter = chapter_index,
                chunk = chunk_index,
                attempt,
                error,
                "chunk failed, retry scheduled"
            );
            return Ok(ReportAck::RetryScheduled { attempt });
        }

        // Retries exhausted: chunk, chapter and job all fail; the last error
        // message is preserved on every level.
        sqlx::query(
            r#"
            UPDATE chunks SET status = 'failed', retry_count = ?, error = ?
            WHERE job_id = ? AND chapter_index = ? AND chunk_index = ?
            "#,
        )
        .bind(attempt as i64)
        .bind(error)
        .bind(job_id)
        .bind(chapter_index)
        .bind(chunk_index)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            UPDATE chapters SET status = 'failed', updated_at = ?
            WHERE job_id = ? AND chapter_index = ?
            "#,
        )
        .bind(now_str())
        .bind(job_id)
        .bind(chapter_index)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        // Two chapters can fail concurrently; the second report finds the job
        // already terminal and has nothing left to do.
        match self.fail_job(job_id, error).await {
            Ok(()) => {}
            Err(Error::IllegalTransition { from, .. }) if from.is_terminal() => {}
            Err(e) => return Err(e),
        }
        warn!(
            job_id = %job_id,
            chapter = chapter_index,
            chunk = chunk_index,
            error,
            "chunk failed permanently, job failed"
        );
        Ok(ReportAck::JobFailed)
    }

    // ------------------------------------------------------------------
    // Assembly support
    // ------------------------------------------------------------------

    /// Completed chunk artifacts of a chapter in chunk order.
    pub async fn chapter_chunk_artifacts(
        &self,
        job_id: &str,
        chapter_index: i64,
    ) -> Result<Vec<(i64, String, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT chunk_index, speaker, artifact_path FROM chunks
            WHERE job_id = ? AND chapter_index = ? AND status = 'completed'
            ORDER BY chunk_index
            "#,
        )
        .bind(job_id)
        .bind(chapter_index)
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|row| {
                let path: Option<String> = row.get("artifact_path");
                let path = path.ok_or_else(|| {
                    Error::Internal("completed chunk without artifact".to_string())
                })?;
                Ok((row.get("chunk_index"), row.get("speaker"), path))
            })
            .collect()
    }

    /// Record a chapter's assembled artifact.
    pub async fn chapter_assembled(
        &self,
        job_id: &str,
        chapter_index: i64,
        artifact_path: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chapters SET artifact_path = ?, updated_at = ? WHERE job_id = ? AND chapter_index = ?",
        )
        .bind(artifact_path)
        .bind(now_str())
        .bind(job_id)
        .bind(chapter_index)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Chapter artifacts of a job in chapter order (assembled chapters only).
    pub async fn chapter_artifacts(&self, job_id: &str) -> Result<Vec<(i64, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT chapter_index, artifact_path FROM chapters
            WHERE job_id = ? AND artifact_path IS NOT NULL
            ORDER BY chapter_index
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("chapter_index"), row.get("artifact_path")))
            .collect())
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Read-only view of one job for progress reporting.
    pub async fn snapshot(&self, job_id: &str) -> Result<JobSnapshot> {
        let row = sqlx::query("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {job_id}")))?;
        self.snapshot_from_row(&row).await
    }

    /// Snapshots of every job, newest first.
    pub async fn list_snapshots(&self) -> Result<Vec<JobSnapshot>> {
        let rows = sqlx::query("SELECT * FROM jobs ORDER BY created_at DESC")
            .fetch_all(&self.db)
            .await?;
        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(self.snapshot_from_row(row).await?);
        }
        Ok(snapshots)
    }

    async fn snapshot_from_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<JobSnapshot> {
        let job_id: String = row.get("job_id");
        let status: JobStatus = row.get::<String, _>("status").parse()?;

        let chapter_rows = sqlx::query(
            r#"
            SELECT chapter_index, status, current_chunk, total_chunks, worker_name
            FROM chapters WHERE job_id = ? ORDER BY chapter_index
            "#,
        )
        .bind(&job_id)
        .fetch_all(&self.db)
        .await?;

        let mut chapter_states = Vec::with_capacity(chapter_rows.len());
        for ch in &chapter_rows {
            chapter_states.push(ChapterState {
                chapter_index: ch.get("chapter_index"),
                status: ch.get::<String, _>("status").parse()?,
                current_chunk: ch.get("current_chunk"),
                total_chunks: ch.get("total_chunks"),
                worker_name: ch.get("worker_name"),
            });
        }

        // Job-level chunk counters mirror the lowest-index active chapter.
        let active = chapter_states
            .iter()
            .find(|c| c.status == WorkStatus::Processing);
        let (current_chapter, current_chunk, total_chunks) = match active {
            Some(c) => (c.chapter_index + 1, c.current_chunk, c.total_chunks),
            None => (
                row.get::<i64, _>("completed_chapters"),
                0,
                0,
            ),
        };

        let output_files: Vec<String> =
            serde_json::from_str(&row.get::<String, _>("output_files"))
                .map_err(|e| Error::Internal(format!("parse output files: {e}")))?;

        Ok(JobSnapshot {
            progress: job_progress(status, &chapter_states),
            job_id,
            title: row.get("title"),
            status,
            current_chunk,
            total_chunks,
            current_chapter,
            total_chapters: row.get("total_chapters"),
            completed_chapters: row.get("completed_chapters"),
            chapter_states,
            output_files,
            error: row.get("error"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    /// Jobs that are not yet in a terminal state.
    pub async fn active_job_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE status IN ('queued', 'processing', 'paused')",
        )
        .fetch_one(&self.db)
        .await?)
    }

    // ------------------------------------------------------------------
    // Lexicon
    // ------------------------------------------------------------------

    pub async fn lexicon_entries(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT word, replacement FROM lexicon ORDER BY word")
            .fetch_all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.get("word"), row.get("replacement")))
            .collect())
    }

    pub async fn lexicon_add(&self, word: &str, replacement: &str) -> Result<()> {
        if word.trim().is_empty() {
            return Err(Error::InvalidInput("lexicon word is empty".to_string()));
        }
        sqlx::query("INSERT OR REPLACE INTO lexicon (word, replacement) VALUES (?, ?)")
            .bind(word)
            .bind(replacement)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn lexicon_delete(&self, word: &str) -> Result<bool> {
        let rows = sqlx::query("DELETE FROM lexicon WHERE word = ?")
            .bind(word)
            .execute(&self.db)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------
    // Worker registry
    // ------------------------------------------------------------------

    pub async fn register_worker(&self, worker_name: &str, pid: Option<u32>) -> Result<()> {
        let now = now_str();
        sqlx::query(
            r#"
            INSERT INTO workers (worker_name, pid, started_at, last_seen, drain_requested)
            VALUES (?, ?, ?, ?, 0)
            ON CONFLICT(worker_name) DO UPDATE SET
                pid = excluded.pid, last_seen = excluded.last_seen, drain_requested = 0
            "#,
        )
        .bind(worker_name)
        .bind(pid.map(|p| p as i64))
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn worker_seen(&self, worker_name: &str) -> Result<()> {
        sqlx::query("UPDATE workers SET last_seen = ? WHERE worker_name = ?")
            .bind(now_str())
            .bind(worker_name)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Ask a worker to finish its current claim and exit.
    pub async fn request_drain(&self, worker_name: &str) -> Result<()> {
        sqlx::query("UPDATE workers SET drain_requested = 1 WHERE worker_name = ?")
            .bind(worker_name)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    pub async fn drain_requested(&self, worker_name: &str) -> Result<bool> {
        let flag: Option<i64> =
            sqlx::query_scalar("SELECT drain_requested FROM workers WHERE worker_name = ?")
                .bind(worker_name)
                .fetch_optional(&self.db)
                .await?;
        Ok(flag.unwrap_or(0) != 0)
    }

    pub async fn remove_worker(&self, worker_name: &str) -> Result<()> {
        sqlx::query("DELETE FROM workers WHERE worker_name = ?")
            .bind(worker_name)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

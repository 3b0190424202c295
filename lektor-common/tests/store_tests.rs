//! Job store integration tests
//!
//! Exercises the job state machine, atomic claims, retry propagation and the
//! progress formula against an in-memory database.

use lektor_common::db::init::init_memory_database;
use lektor_common::model::{
    ChapterSpec, ChunkOutcome, ChunkSpec, JobRequest, JobStatus, WorkStatus,
};
use lektor_common::params::RetryPolicy;
use lektor_common::store::{JobStore, ReportAck};
use lektor_common::Error;

fn request() -> JobRequest {
    JobRequest {
        title: Some("Test book".to_string()),
        text: String::new(),
        chapters: vec![],
        voice_assignments: Default::default(),
        output_format: "wav".to_string(),
        output_bitrate_kbps: 128,
    }
}

/// Chapters of `chunks_per_chapter` one-sentence chunks each.
fn chapters(count: usize, chunks_per_chapter: usize) -> Vec<ChapterSpec> {
    (0..count)
        .map(|c| ChapterSpec {
            chunks: (0..chunks_per_chapter)
                .map(|i| ChunkSpec {
                    speaker: "default".to_string(),
                    text: format!("Chapter {c} sentence {i}."),
                })
                .collect(),
        })
        .collect()
}

/// Immediate retries: no backoff delay between attempts.
fn immediate_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 0,
        backoff_factor: 1.0,
        backoff_cap_ms: 0,
    }
}

async fn store() -> JobStore {
    JobStore::new(init_memory_database().await.unwrap())
}

#[tokio::test]
async fn create_persists_hierarchy_as_queued() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(2, 3)).await.unwrap();

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Queued);
    assert_eq!(snapshot.total_chapters, 2);
    assert_eq!(snapshot.completed_chapters, 0);
    assert_eq!(snapshot.progress, 0);
    assert_eq!(snapshot.chapter_states.len(), 2);
    assert_eq!(snapshot.chapter_states[0].total_chunks, 3);
    assert_eq!(snapshot.chapter_states[0].status, WorkStatus::Pending);
}

#[tokio::test]
async fn create_with_no_chunks_is_invalid_input() {
    let store = store().await;
    let err = store.create(&request(), &[]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn first_claim_moves_job_to_processing() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 2)).await.unwrap();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    assert_eq!(claim.job_id, job_id);
    assert_eq!(claim.chapter_index, 0);
    assert_eq!(claim.chunk_index, 0);
    assert_eq!(store.status(&job_id).await.unwrap(), JobStatus::Processing);
}

#[tokio::test]
async fn claims_respect_chapter_and_chunk_order() {
    let store = store().await;
    store.create(&request(), &chapters(2, 2)).await.unwrap();

    // One claim per chapter at a time: two workers land on different chapters.
    let a = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    let b = store.claim_next_chunk("wk-2").await.unwrap().unwrap();
    assert_eq!((a.chapter_index, a.chunk_index), (0, 0));
    assert_eq!((b.chapter_index, b.chunk_index), (1, 0));

    // Both chapters hold live claims; a third worker gets nothing.
    assert!(store.claim_next_chunk("wk-3").await.unwrap().is_none());
}

#[tokio::test]
async fn chapter_completion_requires_all_chunks() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 2)).await.unwrap();
    let retry = immediate_retry();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    let ack = store
        .report_chunk_result(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            ChunkOutcome::Success {
                artifact_path: "/tmp/c0.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();
    assert_eq!(
        ack,
        ReportAck::Recorded {
            chapter_completed: false,
            all_chapters_completed: false
        }
    );

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.chapter_states[0].status, WorkStatus::Processing);

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    let ack = store
        .report_chunk_result(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            ChunkOutcome::Success {
                artifact_path: "/tmp/c1.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();
    assert_eq!(
        ack,
        ReportAck::Recorded {
            chapter_completed: true,
            all_chapters_completed: true
        }
    );

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.chapter_states[0].status, WorkStatus::Completed);
    assert_eq!(snapshot.completed_chapters, 1);
}

#[tokio::test]
async fn progress_matches_worked_example() {
    // T=3 chapters, C=1 completed, one chapter processing at 2/4 -> 50%.
    let store = store().await;
    let job_id = store.create(&request(), &chapters(3, 4)).await.unwrap();
    let retry = immediate_retry();

    // Complete chapter 0 (4 chunks, claimed one at a time).
    for i in 0..4 {
        let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
        assert_eq!((claim.chapter_index, claim.chunk_index), (0, i));
        store
            .report_chunk_result(
                &claim.job_id,
                claim.chapter_index,
                claim.chunk_index,
                ChunkOutcome::Success {
                    artifact_path: format!("/tmp/ch0-{i}.wav"),
                },
                &retry,
            )
            .await
            .unwrap();
    }

    // Chapter 1: finish chunk 0, leave chunk 1 in flight (current_chunk = 2).
    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    assert_eq!((claim.chapter_index, claim.chunk_index), (1, 0));
    store
        .report_chunk_result(
            &claim.job_id,
            1,
            0,
            ChunkOutcome::Success {
                artifact_path: "/tmp/ch1-0.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();
    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    assert_eq!((claim.chapter_index, claim.chunk_index), (1, 1));

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.progress, 50);
    assert_eq!(snapshot.current_chapter, 2);
    assert_eq!(snapshot.current_chunk, 2);
    assert_eq!(snapshot.total_chunks, 4);
}

#[tokio::test]
async fn progress_never_exceeds_99_before_completion() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 1)).await.unwrap();
    let retry = immediate_retry();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    store
        .report_chunk_result(
            &claim.job_id,
            0,
            0,
            ChunkOutcome::Success {
                artifact_path: "/tmp/only.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();

    // All chunks done but final assembly still outstanding: capped at 99.
    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.progress, 99);

    store
        .complete_job(&job_id, &["/outputs/x/1.wav".to_string()])
        .await
        .unwrap();
    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.output_files, vec!["/outputs/x/1.wav".to_string()]);
}

#[tokio::test]
async fn pause_freezes_claims_but_accepts_inflight_results() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(2, 4)).await.unwrap();
    let retry = immediate_retry();

    // Two in-flight chunks on two chapters, five chunks still pending.
    let a = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    let b = store.claim_next_chunk("wk-2").await.unwrap().unwrap();
    store.pause(&job_id).await.unwrap();

    // No new claims while paused.
    assert!(store.claim_next_chunk("wk-3").await.unwrap().is_none());

    // In-flight chunks are allowed to finish and are recorded.
    for claim in [a, b] {
        let ack = store
            .report_chunk_result(
                &claim.job_id,
                claim.chapter_index,
                claim.chunk_index,
                ChunkOutcome::Success {
                    artifact_path: format!("/tmp/{}.wav", claim.chunk_index),
                },
                &retry,
            )
            .await
            .unwrap();
        assert!(matches!(ack, ReportAck::Recorded { .. }));
    }

    // Still no claims until resume.
    assert!(store.claim_next_chunk("wk-1").await.unwrap().is_none());

    store.resume(&job_id).await.unwrap();
    assert!(store.claim_next_chunk("wk-1").await.unwrap().is_some());
}

#[tokio::test]
async fn cancel_queued_job_produces_no_work() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 3)).await.unwrap();

    store.cancel(&job_id).await.unwrap();
    assert_eq!(store.status(&job_id).await.unwrap(), JobStatus::Cancelled);
    assert!(store.claim_next_chunk("wk-1").await.unwrap().is_none());

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert!(snapshot.output_files.is_empty());
}

#[tokio::test]
async fn cancelled_job_discards_inflight_results() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 2)).await.unwrap();
    let retry = immediate_retry();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    store.cancel(&job_id).await.unwrap();

    let ack = store
        .report_chunk_result(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            ChunkOutcome::Success {
                artifact_path: "/tmp/late.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();
    assert_eq!(ack, ReportAck::Discarded);

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.completed_chapters, 0);
    assert_eq!(snapshot.chapter_states[0].status, WorkStatus::Processing);
}

#[tokio::test]
async fn chunk_is_claimable_again_until_retry_limit() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 1)).await.unwrap();
    let retry = immediate_retry();

    // Two failures with limit 3: chunk must be claimable a third time.
    for attempt in 1..=2u32 {
        let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
        let ack = store
            .report_chunk_result(
                &claim.job_id,
                claim.chapter_index,
                claim.chunk_index,
                ChunkOutcome::Failure {
                    error: "synthesis exploded".to_string(),
                },
                &retry,
            )
            .await
            .unwrap();
        assert_eq!(ack, ReportAck::RetryScheduled { attempt });
    }

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    assert_eq!(claim.retry_count, 2);

    // Third failure exhausts the limit: chunk, chapter and job fail.
    let ack = store
        .report_chunk_result(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            ChunkOutcome::Failure {
                error: "synthesis exploded".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();
    assert_eq!(ack, ReportAck::JobFailed);

    let snapshot = store.snapshot(&job_id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.chapter_states[0].status, WorkStatus::Failed);
    assert_eq!(snapshot.error.as_deref(), Some("synthesis exploded"));
}

#[tokio::test]
async fn retry_backoff_delays_next_claim() {
    let store = store().await;
    store.create(&request(), &chapters(1, 1)).await.unwrap();
    let retry = RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 60_000,
        backoff_factor: 2.0,
        backoff_cap_ms: 120_000,
    };

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    store
        .report_chunk_result(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            ChunkOutcome::Failure {
                error: "transient".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();

    // The minute-long backoff keeps the chunk out of the claim pool.
    assert!(store.claim_next_chunk("wk-1").await.unwrap().is_none());
}

#[tokio::test]
async fn orphaned_claim_returns_to_pending_without_retry_penalty() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 1)).await.unwrap();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();

    // Backdate the heartbeat past the timeout.
    sqlx::query("UPDATE claims SET heartbeat_at = '2000-01-01T00:00:00.000000Z'")
        .execute(store.pool())
        .await
        .unwrap();

    let reclaimed = store.reclaim_orphans(60).await.unwrap();
    assert_eq!(reclaimed, 1);

    // Another worker picks the chunk up; the crash consumed no attempt.
    let second = store.claim_next_chunk("wk-2").await.unwrap().unwrap();
    assert_eq!(second.chunk_index, claim.chunk_index);
    assert_eq!(second.retry_count, 0);
    assert_eq!(store.status(&job_id).await.unwrap(), JobStatus::Processing);
}

#[tokio::test]
async fn live_claim_is_not_reclaimed() {
    let store = store().await;
    store.create(&request(), &chapters(1, 1)).await.unwrap();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    store
        .heartbeat(
            &claim.job_id,
            claim.chapter_index,
            claim.chunk_index,
            "wk-1",
        )
        .await
        .unwrap();

    assert_eq!(store.reclaim_orphans(60).await.unwrap(), 0);
    assert!(store.claim_next_chunk("wk-2").await.unwrap().is_none());
}

#[tokio::test]
async fn illegal_transitions_are_rejected() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 1)).await.unwrap();

    // Resume a queued job: paused is the only state resume applies to.
    let err = store.resume(&job_id).await.unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { .. }));

    // Pause a queued job: nothing in flight to freeze.
    let err = store.pause(&job_id).await.unwrap_err();
    assert!(matches!(err, Error::IllegalTransition { .. }));

    store.cancel(&job_id).await.unwrap();
    let err = store.cancel(&job_id).await.unwrap_err();
    assert!(matches!(
        err,
        Error::IllegalTransition {
            from: JobStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn complete_job_from_paused_steps_through_processing() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 1)).await.unwrap();
    let retry = immediate_retry();

    let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
    store.pause(&job_id).await.unwrap();
    store
        .report_chunk_result(
            &claim.job_id,
            0,
            0,
            ChunkOutcome::Success {
                artifact_path: "/tmp/only.wav".to_string(),
            },
            &retry,
        )
        .await
        .unwrap();

    store
        .complete_job(&job_id, &["/outputs/x/1.wav".to_string()])
        .await
        .unwrap();
    assert_eq!(store.status(&job_id).await.unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn delete_removes_job_and_substate() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(2, 2)).await.unwrap();
    store.claim_next_chunk("wk-1").await.unwrap().unwrap();

    assert!(store.delete(&job_id).await.unwrap());
    assert!(matches!(
        store.snapshot(&job_id).await.unwrap_err(),
        Error::NotFound(_)
    ));

    let chunk_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(chunk_count, 0);
    let claim_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM claims")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(claim_count, 0);

    assert!(!store.delete(&job_id).await.unwrap());
}

#[tokio::test]
async fn chapter_artifacts_are_recorded_for_assembly() {
    let store = store().await;
    let job_id = store.create(&request(), &chapters(1, 2)).await.unwrap();
    let retry = immediate_retry();

    for i in 0..2 {
        let claim = store.claim_next_chunk("wk-1").await.unwrap().unwrap();
        store
            .report_chunk_result(
                &claim.job_id,
                claim.chapter_index,
                claim.chunk_index,
                ChunkOutcome::Success {
                    artifact_path: format!("/tmp/chunk-{i}.wav"),
                },
                &retry,
            )
            .await
            .unwrap();
    }

    let artifacts = store.chapter_chunk_artifacts(&job_id, 0).await.unwrap();
    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts[0].2, "/tmp/chunk-0.wav");

    store
        .chapter_assembled(&job_id, 0, "/outputs/x/1.wav")
        .await
        .unwrap();
    let chapter_files = store.chapter_artifacts(&job_id).await.unwrap();
    assert_eq!(chapter_files, vec![(0, "/outputs/x/1.wav".to_string())]);
}

#[tokio::test]
async fn drain_flag_round_trips_through_registry() {
    let store = store().await;
    store.register_worker("wk-9", Some(1234)).await.unwrap();
    assert!(!store.drain_requested("wk-9").await.unwrap());

    store.request_drain("wk-9").await.unwrap();
    assert!(store.drain_requested("wk-9").await.unwrap());

    store.remove_worker("wk-9").await.unwrap();
    assert!(!store.drain_requested("wk-9").await.unwrap());
}

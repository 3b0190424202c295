//! HTTP request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use lektor_common::db::settings::{
    get_setting_or, set_desired_workers, set_setting,
};
use lektor_common::events::LektorEvent;
use lektor_common::model::{JobRequest, JobSnapshot};
use lektor_common::params::{PipelineParams, RetryPolicy, SynthesisDefaults};
use lektor_common::Error;

use crate::api::server::AppContext;
use crate::segment;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    success: bool,
    job_id: String,
    queue_position: i64,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    success: bool,
    jobs: Vec<JobSnapshot>,
    active_count: i64,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    success: bool,
    job: JobSnapshot,
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    success: bool,
    pipeline: PipelineParams,
    synthesis: SynthesisDefaults,
    retry: RetryPolicy,
    desired_workers: usize,
    chunk_char_budget: usize,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    #[serde(default)]
    pipeline: Option<PipelineParams>,
    #[serde(default)]
    desired_workers: Option<usize>,
    #[serde(default)]
    chunk_char_budget: Option<usize>,
    #[serde(default)]
    gen_language: Option<String>,
    #[serde(default)]
    default_voice_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LexiconResponse {
    success: bool,
    entries: Vec<LexiconEntry>,
    count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LexiconEntry {
    word: String,
    replacement: String,
}

type ApiError = (StatusCode, Json<StatusResponse>);

fn error_response(err: Error) -> ApiError {
    let status = match &err {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::IllegalTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("request failed: {err}");
    }
    (
        status,
        Json(StatusResponse {
            success: false,
            error: Some(err.to_string()),
        }),
    )
}

fn ok() -> Json<StatusResponse> {
    Json(StatusResponse {
        success: true,
        error: None,
    })
}

// ============================================================================
// Health Endpoint
// ============================================================================

/// GET /health - Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        module: "coordinator".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Job Endpoints
// ============================================================================

/// POST /api/jobs - Submit a generation job
pub async fn create_job(
    State(ctx): State<AppContext>,
    Json(mut request): Json<JobRequest>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    if request.text.trim().is_empty() && request.chapters.is_empty() {
        return Err(error_response(Error::InvalidInput(
            "text is empty".to_string(),
        )));
    }

    // Lexicon replacements happen before segmentation so chunk boundaries
    // reflect the text the TTS model will actually read.
    let lexicon = ctx
        .store
        .lexicon_entries()
        .await
        .map_err(error_response)?;
    if !lexicon.is_empty() {
        request.text = segment::apply_lexicon(&request.text, &lexicon);
        request.chapters = request
            .chapters
            .iter()
            .map(|c| segment::apply_lexicon(c, &lexicon))
            .collect();
    }

    let budget: usize = get_setting_or(ctx.store.pool(), "chunk_char_budget", 450usize)
        .await
        .map_err(error_response)?;
    let chapters =
        segment::segment_job(&request.text, &request.chapters, budget).map_err(error_response)?;

    if request.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
        request.title = Some(segment::derive_title(&request.text, &request.chapters));
    }

    let job_id = ctx
        .store
        .create(&request, &chapters)
        .await
        .map_err(error_response)?;
    let active = ctx
        .store
        .active_job_count()
        .await
        .map_err(error_response)?;

    info!(job_id = %job_id, "job submitted");
    Ok(Json(CreateJobResponse {
        success: true,
        job_id,
        queue_position: active,
    }))
}

/// GET /api/jobs - Snapshots of all jobs
pub async fn list_jobs(
    State(ctx): State<AppContext>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = ctx.store.list_snapshots().await.map_err(error_response)?;
    let active_count = ctx
        .store
        .active_job_count()
        .await
        .map_err(error_response)?;
    Ok(Json(JobListResponse {
        success: true,
        jobs,
        active_count,
    }))
}

/// GET /api/jobs/:job_id - One job snapshot
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = ctx.store.snapshot(&job_id).await.map_err(error_response)?;
    Ok(Json(JobResponse { success: true, job }))
}

fn notify_status(ctx: &AppContext, job_id: &str, status: lektor_common::model::JobStatus) {
    let _ = ctx.events.send(LektorEvent::JobStatusChanged {
        job_id: job_id.to_string(),
        status,
        timestamp: chrono::Utc::now(),
    });
}

/// POST /api/jobs/:job_id/pause
pub async fn pause_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = ctx.store.pause(&job_id).await.map_err(error_response)?;
    notify_status(&ctx, &job_id, status);
    Ok(ok())
}

/// POST /api/jobs/:job_id/resume
pub async fn resume_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = ctx.store.resume(&job_id).await.map_err(error_response)?;
    notify_status(&ctx, &job_id, status);
    Ok(ok())
}

/// POST /api/jobs/:job_id/cancel
pub async fn cancel_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = ctx.store.cancel(&job_id).await.map_err(error_response)?;
    notify_status(&ctx, &job_id, status);
    Ok(ok())
}

/// DELETE /api/jobs/:job_id - Remove a job and its artifacts
pub async fn delete_job(
    State(ctx): State<AppContext>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let deleted = ctx.store.delete(&job_id).await.map_err(error_response)?;
    if !deleted {
        return Err(error_response(Error::NotFound(format!("job {job_id}"))));
    }
    let job_dir = ctx.layout.job_dir(&job_id);
    if job_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&job_dir) {
            error!(job_id = %job_id, "failed to remove job artifacts: {e}");
        }
    }
    Ok(ok())
}

// ============================================================================
// Settings Endpoints
// ============================================================================

/// GET /api/settings
pub async fn get_settings(
    State(ctx): State<AppContext>,
) -> Result<Json<SettingsResponse>, ApiError> {
    let db = ctx.store.pool();
    let pipeline = PipelineParams::load(db).await.map_err(error_response)?;
    let synthesis = SynthesisDefaults::load(db).await.map_err(error_response)?;
    let retry = RetryPolicy::load(db).await.map_err(error_response)?;
    let desired_workers = lektor_common::db::settings::get_desired_workers(db)
        .await
        .map_err(error_response)?;
    let chunk_char_budget = get_setting_or(db, "chunk_char_budget", 450usize)
        .await
        .map_err(error_response)?;
    Ok(Json(SettingsResponse {
        success: true,
        pipeline,
        synthesis,
        retry,
        desired_workers,
        chunk_char_budget,
    }))
}

/// POST /api/settings - Update pipeline parameters and pool size
///
/// Saving pipeline parameters bumps their version; workers pick the new
/// snapshot up at their next chunk.
pub async fn update_settings(
    State(ctx): State<AppContext>,
    Json(request): Json<UpdateSettingsRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let db = ctx.store.pool();

    if let Some(pipeline) = &request.pipeline {
        let version = pipeline.save(db).await.map_err(error_response)?;
        info!(version, "pipeline parameters updated");
    }
    if let Some(count) = request.desired_workers {
        set_desired_workers(db, count).await.map_err(error_response)?;
        info!(count, "desired worker count updated");
    }
    if let Some(budget) = request.chunk_char_budget {
        set_setting(db, "chunk_char_budget", budget.clamp(50, 5000))
            .await
            .map_err(error_response)?;
    }
    if let Some(language) = &request.gen_language {
        set_setting(db, "gen_language", language)
            .await
            .map_err(error_response)?;
    }
    if let Some(voice) = &request.default_voice_id {
        set_setting(db, "default_voice_id", voice)
            .await
            .map_err(error_response)?;
    }
    Ok(ok())
}

// ============================================================================
// Lexicon Endpoints
// ============================================================================

/// GET /api/lexicon
pub async fn get_lexicon(
    State(ctx): State<AppContext>,
) -> Result<Json<LexiconResponse>, ApiError> {
    let entries = ctx
        .store
        .lexicon_entries()
        .await
        .map_err(error_response)?;
    let entries: Vec<LexiconEntry> = entries
        .into_iter()
        .map(|(word, replacement)| LexiconEntry { word, replacement })
        .collect();
    let count = entries.len();
    Ok(Json(LexiconResponse {
        success: true,
        entries,
        count,
    }))
}

/// POST /api/lexicon - Add or replace one entry
pub async fn add_lexicon_word(
    State(ctx): State<AppContext>,
    Json(entry): Json<LexiconEntry>,
) -> Result<Json<StatusResponse>, ApiError> {
    ctx.store
        .lexicon_add(&entry.word, &entry.replacement)
        .await
        .map_err(error_response)?;
    Ok(ok())
}

/// DELETE /api/lexicon/:word
pub async fn delete_lexicon_word(
    State(ctx): State<AppContext>,
    Path(word): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let removed = ctx
        .store
        .lexicon_delete(&word)
        .await
        .map_err(error_response)?;
    if !removed {
        return Err(error_response(Error::NotFound(format!(
            "lexicon entry {word}"
        ))));
    }
    Ok(ok())
}

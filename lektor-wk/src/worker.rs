//! Worker claim loop
//!
//! One long-lived worker claims one chunk at a time from the shared store,
//! reloads the pipeline parameter snapshot, synthesizes, repairs, writes the
//! chunk artifact and reports back. The worker that completes a chapter's
//! last chunk assembles the chapter artifact; the worker that completes the
//! job's last chapter assembles the final output.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use lektor_common::config::RootLayout;
use lektor_common::db::settings::get_setting_or;
use lektor_common::model::{ChunkOutcome, ClaimedChunk, VoiceAssignment};
use lektor_common::params::{PipelineParams, RetryPolicy, SynthesisDefaults};
use lektor_common::store::{JobStore, ReportAck};
use lektor_common::{Error, Result};

use crate::assemble::{assemble_chapter, assemble_job, order_chunks, ChunkAudio};
use crate::audio::{read_wav, write_wav};
use crate::models::{DenoiseModel, SpeechToText, SynthesisRequest, Synthesizer};
use crate::pipeline::{build_pipeline, run_pipeline, ChunkContext};
use crate::resample::apply_speed;
use crate::transcode::Transcoder;

/// Sleep between claim attempts when no work is available.
const IDLE_WAIT: Duration = Duration::from_secs(1);
/// How long the final-assembly worker waits for sibling chapter artifacts.
const ASSEMBLY_WAIT: Duration = Duration::from_secs(300);

pub struct Worker {
    pub store: JobStore,
    pub layout: RootLayout,
    pub name: String,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub denoiser: Arc<dyn DenoiseModel>,
    pub stt: Arc<dyn SpeechToText>,
    pub transcoder: Arc<dyn Transcoder>,
}

impl Worker {
    /// Claim/process loop. Exits when a drain is requested or the shutdown
    /// flag fires.
    pub async fn run(&self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(worker = %self.name, "worker loop started");
        loop {
            if shutdown.try_recv().is_ok() {
                info!(worker = %self.name, "shutdown requested, exiting");
                break;
            }
            match self.store.drain_requested(&self.name).await {
                Ok(true) => {
                    info!(worker = %self.name, "drain requested, exiting");
                    break;
                }
                Ok(false) => {}
                Err(e) => error!(worker = %self.name, "drain check failed: {e}"),
            }
            if let Err(e) = self.store.worker_seen(&self.name).await {
                error!(worker = %self.name, "liveness update failed: {e}");
            }

            match self.run_once().await {
                Ok(true) => {}
                Ok(false) => tokio::time::sleep(IDLE_WAIT).await,
                Err(e) => {
                    error!(worker = %self.name, "worker iteration failed: {e}");
                    tokio::time::sleep(IDLE_WAIT).await;
                }
            }
        }
        let _ = self.store.remove_worker(&self.name).await;
    }

    /// Claim and process at most one chunk. Returns whether work was done.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(claim) = self.store.claim_next_chunk(&self.name).await? else {
            return Ok(false);
        };
        info!(
            worker = %self.name,
            job_id = %claim.job_id,
            chapter = claim.chapter_index,
            chunk = claim.chunk_index,
            attempt = claim.retry_count + 1,
            "claimed chunk"
        );

        // Keep the claim alive while the chunk is in flight.
        let heartbeat = self.spawn_heartbeat(&claim).await?;
        let result = self.process_claim(&claim).await;
        heartbeat.abort();

        let retry = RetryPolicy::load(self.store.pool()).await?;
        let outcome = match &result {
            Ok(artifact_path) => ChunkOutcome::Success {
                artifact_path: artifact_path.clone(),
            },
            Err(e) => ChunkOutcome::Failure {
                error: e.to_string(),
            },
        };
        let ack = self
            .store
            .report_chunk_result(
                &claim.job_id,
                claim.chapter_index,
                claim.chunk_index,
                outcome,
                &retry,
            )
            .await?;

        match ack {
            ReportAck::Recorded {
                chapter_completed,
                all_chapters_completed,
            } => {
                if chapter_completed {
                    self.assemble_chapter_artifact(&claim).await?;
                }
                if all_chapters_completed {
                    self.assemble_final_artifact(&claim).await?;
                }
            }
            ReportAck::Discarded => {
                info!(
                    worker = %self.name,
                    job_id = %claim.job_id,
                    "result discarded, job cancelled"
                );
                if let Ok(path) = &result {
                    let _ = std::fs::remove_file(path);
                }
            }
            ReportAck::RetryScheduled { .. } | ReportAck::JobFailed => {}
        }
        Ok(true)
    }

    async fn spawn_heartbeat(&self, claim: &ClaimedChunk) -> Result<tokio::task::JoinHandle<()>> {
        let interval_secs: u64 = get_setting_or(self.store.pool(), "heartbeat_interval_secs", 10)
            .await?;
        let store = self.store.clone();
        let name = self.name.clone();
        let (job_id, chapter, chunk) = (
            claim.job_id.clone(),
            claim.chapter_index,
            claim.chunk_index,
        );
        Ok(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
            tick.tick().await; // first tick fires immediately
            loop {
                tick.tick().await;
                if let Err(e) = store.heartbeat(&job_id, chapter, chunk, &name).await {
                    warn!(worker = %name, "heartbeat failed: {e}");
                }
            }
        }))
    }

    /// Synthesize one chunk and run it through the repair pipeline.
    ///
    /// The parameter snapshot is reloaded fresh for every chunk; nothing is
    /// cached across claims.
    async fn process_claim(&self, claim: &ClaimedChunk) -> Result<String> {
        let params = PipelineParams::load(self.store.pool()).await?;
        let defaults = SynthesisDefaults::load(self.store.pool()).await?;

        let (voice_id, language, speed_factor) = self.resolve_voice(claim, &defaults);
        let request = SynthesisRequest {
            text: claim.text.clone(),
            voice_id,
            language,
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            repetition_penalty: defaults.repetition_penalty,
            cfg_weight: defaults.cfg_weight,
            exaggeration: defaults.exaggeration,
        };
        let audio = self.synthesizer.synthesize(&request).await?;

        let ctx = ChunkContext {
            job_id: claim.job_id.clone(),
            chapter_index: claim.chapter_index,
            chunk_index: claim.chunk_index,
            worker_name: self.name.clone(),
            text: claim.text.clone(),
        };
        let stages = build_pipeline(&params, self.denoiser.clone(), self.stt.clone());
        let mut audio = run_pipeline(&stages, audio, &ctx).await?;

        if (speed_factor - 1.0).abs() > f32::EPSILON {
            audio = apply_speed(&audio, speed_factor)?;
        }
        if audio.is_empty() {
            return Err(Error::Synthesis("chunk produced empty audio".to_string()));
        }

        let path = self.chunk_artifact_path(claim);
        write_wav(&path, &audio)?;
        info!(
            worker = %self.name,
            job_id = %claim.job_id,
            chapter = claim.chapter_index,
            chunk = claim.chunk_index,
            params_version = params.version,
            seconds = format!("{:.2}", audio.duration_secs()),
            "chunk synthesized"
        );
        Ok(path.to_string_lossy().into_owned())
    }

    /// Voice resolution chain: speaker assignment, then the job's `default`
    /// assignment, then the configured default voice.
    fn resolve_voice(
        &self,
        claim: &ClaimedChunk,
        defaults: &SynthesisDefaults,
    ) -> (String, String, f32) {
        let speaker = claim.voice_assignments.get(&claim.speaker);
        let fallback = claim.voice_assignments.get("default");
        let pick = |f: fn(&VoiceAssignment) -> Option<String>| {
            speaker.and_then(f).or_else(|| fallback.and_then(f))
        };

        let voice = pick(|a| a.voice.clone()).unwrap_or_else(|| defaults.default_voice_id.clone());
        let language = pick(|a| a.language.clone()).unwrap_or_else(|| defaults.language.clone());
        let speed = speaker
            .and_then(|a| a.speed_factor)
            .or_else(|| fallback.and_then(|a| a.speed_factor))
            .unwrap_or(defaults.speed_factor);
        (voice, language, speed)
    }

    fn chunk_artifact_path(&self, claim: &ClaimedChunk) -> PathBuf {
        self.layout.job_dir(&claim.job_id).join("chunks").join(format!(
            "ch{:03}_k{:04}.wav",
            claim.chapter_index, claim.chunk_index
        ))
    }

    /// Build a chapter artifact from its completed chunks: assembly spacing
    /// and crossfade, loudness normalization, then the requested container.
    async fn assemble_chapter_artifact(&self, claim: &ClaimedChunk) -> Result<()> {
        let params = PipelineParams::load(self.store.pool()).await?;
        let artifacts = self
            .store
            .chapter_chunk_artifacts(&claim.job_id, claim.chapter_index)
            .await?;
        if artifacts.is_empty() {
            return Err(Error::Internal(format!(
                "chapter {} of job {} completed with no artifacts",
                claim.chapter_index, claim.job_id
            )));
        }

        let mut chunks = Vec::with_capacity(artifacts.len());
        for (chunk_index, speaker, path) in artifacts {
            chunks.push(ChunkAudio {
                chunk_index,
                speaker,
                audio: read_wav(std::path::Path::new(&path))?,
            });
        }
        let sample_rate = chunks[0].audio.sample_rate;
        let ordered = order_chunks(chunks, params.group_by_speaker);
        let assembled = assemble_chapter(&ordered, &params, sample_rate);

        let normalized = self
            .transcoder
            .normalize(&assembled, params.target_loudness_lufs)
            .await?;

        // The chapter WAV is kept for final concatenation; the requested
        // container is what the listener downloads.
        let job_dir = self.layout.job_dir(&claim.job_id);
        let chapter_no = claim.chapter_index + 1;
        let wav_path = job_dir.join(format!("{chapter_no}.wav"));
        write_wav(&wav_path, &normalized)?;

        let format = self.effective_format(&claim.output_format);
        if format != "wav" {
            let out_path = job_dir.join(format!("{chapter_no}.{format}"));
            self.transcoder
                .encode(&normalized, format, claim.output_bitrate_kbps, &out_path)
                .await?;
        }

        self.store
            .chapter_assembled(
                &claim.job_id,
                claim.chapter_index,
                &wav_path.to_string_lossy(),
            )
            .await?;
        info!(
            worker = %self.name,
            job_id = %claim.job_id,
            chapter = claim.chapter_index,
            "chapter assembled"
        );
        Ok(())
    }

    /// Concatenate chapter artifacts into the final job output and complete
    /// the job.
    async fn assemble_final_artifact(&self, claim: &ClaimedChunk) -> Result<()> {
        let total_chapters: i64 = sqlx::query_scalar(
            "SELECT total_chapters FROM jobs WHERE job_id = ?",
        )
        .bind(&claim.job_id)
        .fetch_one(self.store.pool())
        .await?;

        // Sibling workers may still be normalizing their chapters; wait for
        // every chapter artifact to land before concatenating.
        let deadline = tokio::time::Instant::now() + ASSEMBLY_WAIT;
        let chapter_files = loop {
            let files = self.store.chapter_artifacts(&claim.job_id).await?;
            if files.len() as i64 >= total_chapters {
                break files;
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::Internal(format!(
                    "timed out waiting for chapter artifacts of job {} ({}/{})",
                    claim.job_id,
                    files.len(),
                    total_chapters
                )));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        };

        let mut chapters = Vec::with_capacity(chapter_files.len());
        for (_, path) in &chapter_files {
            chapters.push(read_wav(std::path::Path::new(path))?);
        }
        let sample_rate = chapters.first().map(|c| c.sample_rate).unwrap_or(24000);
        let book = assemble_job(&chapters, sample_rate);

        let format = self.effective_format(&claim.output_format);
        let job_dir = self.layout.job_dir(&claim.job_id);
        let final_path = job_dir.join(format!("book.{format}"));
        self.transcoder
            .encode(&book, format, claim.output_bitrate_kbps, &final_path)
            .await?;

        // Listener-facing paths, chapter files first, final artifact last.
        let mut output_files: Vec<String> = chapter_files
            .iter()
            .map(|(index, _)| format!("/outputs/{}/{}.{format}", claim.job_id, index + 1))
            .collect();
        output_files.push(format!("/outputs/{}/book.{format}", claim.job_id));

        self.store.complete_job(&claim.job_id, &output_files).await?;
        info!(
            worker = %self.name,
            job_id = %claim.job_id,
            chapters = chapter_files.len(),
            "job assembled and completed"
        );
        Ok(())
    }

    fn effective_format<'a>(&self, requested: &'a str) -> &'a str {
        if self.transcoder.supports_format(requested) {
            requested
        } else {
            warn!(
                worker = %self.name,
                requested,
                "output format unsupported, falling back to wav"
            );
            "wav"
        }
    }
}

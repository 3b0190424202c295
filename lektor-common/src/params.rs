//! Pipeline parameter snapshots
//!
//! Tunable audio-repair and assembly parameters live in the settings table so
//! they can change between units of work without a restart. A worker loads a
//! fresh `PipelineParams` snapshot before every chunk and never caches one
//! across chunks; the snapshot itself is immutable, so a chunk can never
//! observe half-updated parameters mid-pipeline. `version` increases on every
//! settings save and ties log lines to the parameter set that produced them.

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::db::settings::{get_setting_or, set_setting};
use crate::Result;

/// Immutable snapshot of the audio pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineParams {
    /// Monotonically increasing; bumped on every settings save
    pub version: i64,

    /// Spectral denoise stage. Off by default: aggressive strength introduces
    /// high-frequency metallic artifacts, so this stays a tunable trade-off.
    pub denoise_enabled: bool,
    /// Blend of denoised signal into the original, 0.0..=1.0
    pub denoise_strength: f32,

    /// Silence-trim stage
    pub trim_enabled: bool,
    /// Energy threshold as a percentage of full scale (0.1..=10.0 typical)
    pub trim_threshold_pct: f32,
    /// Retained margin around detected speech, in seconds
    pub trim_margin_s: f32,

    /// Transcript validation stage
    pub validation_enabled: bool,
    pub validation_language: String,
    /// Similarity ratio below which a mismatch is reported, 0.0..=1.0
    pub validation_similarity: f32,
    /// When set, a mismatch fails the chunk instead of logging a warning
    pub validation_hard_fail: bool,

    /// Chapter assembly spacing
    pub intro_silence_ms: u32,
    pub inter_chunk_silence_ms: u32,
    /// Pause appended after each chunk (sentence gap)
    pub sentence_pause_ms: u32,
    /// Crossfade at chunk boundaries; 0 disables
    pub crossfade_ms: u32,
    /// Order chunks by speaker instead of source order
    pub group_by_speaker: bool,

    /// Loudness normalization target
    pub target_loudness_lufs: f32,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self {
            version: 1,
            denoise_enabled: false,
            denoise_strength: 0.5,
            trim_enabled: false,
            trim_threshold_pct: 2.0,
            trim_margin_s: 0.2,
            validation_enabled: false,
            validation_language: "pl".to_string(),
            validation_similarity: 0.5,
            validation_hard_fail: false,
            intro_silence_ms: 0,
            inter_chunk_silence_ms: 0,
            sentence_pause_ms: 500,
            crossfade_ms: 0,
            group_by_speaker: false,
            target_loudness_lufs: -18.0,
        }
    }
}

impl PipelineParams {
    /// Load a fresh snapshot from the settings table.
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            version: get_setting_or(db, "pipeline_version", defaults.version).await?,
            denoise_enabled: get_setting_or(db, "denoise_enabled", defaults.denoise_enabled)
                .await?,
            denoise_strength: get_setting_or(db, "denoise_strength", defaults.denoise_strength)
                .await?
                .clamp(0.0, 1.0),
            trim_enabled: get_setting_or(db, "trim_enabled", defaults.trim_enabled).await?,
            trim_threshold_pct: get_setting_or(
                db,
                "trim_threshold_pct",
                defaults.trim_threshold_pct,
            )
            .await?,
            trim_margin_s: get_setting_or(db, "trim_margin_s", defaults.trim_margin_s).await?,
            validation_enabled: get_setting_or(
                db,
                "validation_enabled",
                defaults.validation_enabled,
            )
            .await?,
            validation_language: get_setting_or(
                db,
                "validation_language",
                defaults.validation_language.clone(),
            )
            .await?,
            validation_similarity: get_setting_or(
                db,
                "validation_similarity",
                defaults.validation_similarity,
            )
            .await?,
            validation_hard_fail: get_setting_or(
                db,
                "validation_hard_fail",
                defaults.validation_hard_fail,
            )
            .await?,
            intro_silence_ms: get_setting_or(db, "intro_silence_ms", defaults.intro_silence_ms)
                .await?,
            inter_chunk_silence_ms: get_setting_or(
                db,
                "inter_chunk_silence_ms",
                defaults.inter_chunk_silence_ms,
            )
            .await?,
            sentence_pause_ms: get_setting_or(db, "sentence_pause_ms", defaults.sentence_pause_ms)
                .await?,
            crossfade_ms: get_setting_or(db, "crossfade_ms", defaults.crossfade_ms).await?,
            group_by_speaker: get_setting_or(
                db,
                "group_chunks_by_speaker",
                defaults.group_by_speaker,
            )
            .await?,
            target_loudness_lufs: get_setting_or(
                db,
                "target_loudness_lufs",
                defaults.target_loudness_lufs,
            )
            .await?,
        })
    }

    /// Persist this snapshot and bump the version counter.
    pub async fn save(&self, db: &Pool<Sqlite>) -> Result<i64> {
        let version: i64 = get_setting_or(db, "pipeline_version", 0i64).await? + 1;
        set_setting(db, "pipeline_version", version).await?;
        set_setting(db, "denoise_enabled", self.denoise_enabled).await?;
        set_setting(db, "denoise_strength", self.denoise_strength.clamp(0.0, 1.0)).await?;
        set_setting(db, "trim_enabled", self.trim_enabled).await?;
        set_setting(db, "trim_threshold_pct", self.trim_threshold_pct).await?;
        set_setting(db, "trim_margin_s", self.trim_margin_s).await?;
        set_setting(db, "validation_enabled", self.validation_enabled).await?;
        set_setting(db, "validation_language", &self.validation_language).await?;
        set_setting(db, "validation_similarity", self.validation_similarity).await?;
        set_setting(db, "validation_hard_fail", self.validation_hard_fail).await?;
        set_setting(db, "intro_silence_ms", self.intro_silence_ms).await?;
        set_setting(db, "inter_chunk_silence_ms", self.inter_chunk_silence_ms).await?;
        set_setting(db, "sentence_pause_ms", self.sentence_pause_ms).await?;
        set_setting(db, "crossfade_ms", self.crossfade_ms).await?;
        set_setting(db, "group_chunks_by_speaker", self.group_by_speaker).await?;
        set_setting(db, "target_loudness_lufs", self.target_loudness_lufs).await?;
        Ok(version)
    }
}

/// Synthesis decoding defaults, read fresh per chunk alongside the pipeline
/// parameters. Per-speaker voice assignments override language and speed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisDefaults {
    pub model_server_url: String,
    pub sample_rate: u32,
    pub default_voice_id: String,
    pub language: String,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub cfg_weight: f32,
    pub exaggeration: f32,
    pub speed_factor: f32,
}

impl Default for SynthesisDefaults {
    fn default() -> Self {
        Self {
            model_server_url: "http://127.0.0.1:8004".to_string(),
            sample_rate: 24000,
            default_voice_id: String::new(),
            language: "pl".to_string(),
            temperature: 0.8,
            top_p: 0.95,
            repetition_penalty: 1.2,
            cfg_weight: 0.5,
            exaggeration: 0.5,
            speed_factor: 1.0,
        }
    }
}

impl SynthesisDefaults {
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            model_server_url: get_setting_or(db, "model_server_url", d.model_server_url).await?,
            sample_rate: get_setting_or(db, "audio_sample_rate", d.sample_rate).await?,
            default_voice_id: get_setting_or(db, "default_voice_id", d.default_voice_id).await?,
            language: get_setting_or(db, "gen_language", d.language).await?,
            temperature: get_setting_or(db, "gen_temperature", d.temperature).await?,
            top_p: get_setting_or(db, "gen_top_p", d.top_p).await?,
            repetition_penalty: get_setting_or(db, "gen_repetition_penalty", d.repetition_penalty)
                .await?,
            cfg_weight: get_setting_or(db, "gen_cfg_weight", d.cfg_weight).await?,
            exaggeration: get_setting_or(db, "gen_exaggeration", d.exaggeration).await?,
            speed_factor: get_setting_or(db, "gen_speed_factor", d.speed_factor).await?,
        })
    }
}

/// Bounded retry policy for chunk synthesis failures.
///
/// The backoff delay for attempt `n` (1-based) is
/// `min(base * factor^(n-1), cap)`. Claim-timeout reclaims bypass this policy
/// entirely: a worker crash is not a content failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_factor: f64,
    pub backoff_cap_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            backoff_factor: 2.0,
            backoff_cap_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub async fn load(db: &Pool<Sqlite>) -> Result<Self> {
        let d = Self::default();
        Ok(Self {
            max_attempts: get_setting_or(db, "retry_max_attempts", d.max_attempts).await?,
            backoff_base_ms: get_setting_or(db, "retry_backoff_base_ms", d.backoff_base_ms)
                .await?,
            backoff_factor: get_setting_or(db, "retry_backoff_factor", d.backoff_factor).await?,
            backoff_cap_ms: get_setting_or(db, "retry_backoff_cap_ms", d.backoff_cap_ms).await?,
        })
    }

    /// Delay before the given retry attempt (1-based) becomes claimable.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1);
        let delay = self.backoff_base_ms as f64 * self.backoff_factor.powi(exp as i32);
        (delay as u64).min(self.backoff_cap_ms)
    }
}

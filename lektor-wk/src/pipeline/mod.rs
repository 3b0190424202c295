//! Audio repair pipeline
//!
//! Ordered, independently toggleable stages, each transforming an in-memory
//! sample buffer. The active pipeline is assembled from the parameter
//! snapshot as a list of stage objects; a disabled stage simply is not in the
//! list.

pub mod denoise;
pub mod trim;
pub mod validate;

use std::sync::Arc;

use async_trait::async_trait;

use lektor_common::params::PipelineParams;
use lektor_common::Result;

use crate::audio::AudioBuffer;
use crate::models::{DenoiseModel, SpeechToText};

pub use denoise::DenoiseStage;
pub use trim::TrimStage;
pub use validate::ValidateStage;

/// Identity of the chunk flowing through the pipeline, for logging and
/// transcript validation.
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub job_id: String,
    pub chapter_index: i64,
    pub chunk_index: i64,
    pub worker_name: String,
    /// Source text the chunk was synthesized from
    pub text: String,
}

/// One pipeline stage: a single transform over a sample buffer.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn process(&self, audio: AudioBuffer, ctx: &ChunkContext) -> Result<AudioBuffer>;
}

/// Assemble the active stage list from a parameter snapshot.
pub fn build_pipeline(
    params: &PipelineParams,
    denoiser: Arc<dyn DenoiseModel>,
    stt: Arc<dyn SpeechToText>,
) -> Vec<Box<dyn Stage>> {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    if params.denoise_enabled && params.denoise_strength > 0.0 {
        stages.push(Box::new(DenoiseStage::new(
            denoiser,
            params.denoise_strength,
        )));
    }
    if params.trim_enabled {
        stages.push(Box::new(TrimStage::new(
            params.trim_threshold_pct,
            params.trim_margin_s,
        )));
    }
    if params.validation_enabled {
        stages.push(Box::new(ValidateStage::new(
            stt,
            params.validation_language.clone(),
            params.validation_similarity,
            params.validation_hard_fail,
        )));
    }
    stages
}

/// Run a buffer through every stage in order.
pub async fn run_pipeline(
    stages: &[Box<dyn Stage>],
    mut audio: AudioBuffer,
    ctx: &ChunkContext,
) -> Result<AudioBuffer> {
    for stage in stages {
        audio = stage.process(audio, ctx).await?;
    }
    Ok(audio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::{MockDenoiser, MockStt};

    fn params() -> PipelineParams {
        PipelineParams::default()
    }

    #[test]
    fn disabled_stages_are_not_built() {
        let stages = build_pipeline(&params(), Arc::new(MockDenoiser), Arc::new(MockStt::new("")));
        assert!(stages.is_empty());
    }

    #[test]
    fn enabled_stages_appear_in_order() {
        let p = PipelineParams {
            denoise_enabled: true,
            denoise_strength: 0.5,
            trim_enabled: true,
            validation_enabled: true,
            ..params()
        };
        let stages = build_pipeline(&p, Arc::new(MockDenoiser), Arc::new(MockStt::new("x")));
        let names: Vec<&str> = stages.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["denoise", "silence-trim", "transcript-validation"]);
    }

    #[test]
    fn zero_strength_denoise_is_skipped() {
        let p = PipelineParams {
            denoise_enabled: true,
            denoise_strength: 0.0,
            ..params()
        };
        let stages = build_pipeline(&p, Arc::new(MockDenoiser), Arc::new(MockStt::new("")));
        assert!(stages.is_empty());
    }
}

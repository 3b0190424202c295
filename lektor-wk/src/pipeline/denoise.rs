//! Spectral denoise stage
//!
//! Feeds the buffer through the external denoise model in 480-sample frames
//! and blends the result with the original by the configured strength. Full
//! strength can introduce high-frequency metallic artifacts on some voices,
//! which is why the stage ships disabled and the strength stays a tunable.

use std::sync::Arc;

use async_trait::async_trait;

use lektor_common::Result;

use crate::audio::AudioBuffer;
use crate::models::{DenoiseModel, DENOISE_FRAME};
use crate::pipeline::{ChunkContext, Stage};

pub struct DenoiseStage {
    model: Arc<dyn DenoiseModel>,
    strength: f32,
}

impl DenoiseStage {
    pub fn new(model: Arc<dyn DenoiseModel>, strength: f32) -> Self {
        Self {
            model,
            strength: strength.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl Stage for DenoiseStage {
    fn name(&self) -> &'static str {
        "denoise"
    }

    async fn process(&self, audio: AudioBuffer, _ctx: &ChunkContext) -> Result<AudioBuffer> {
        if audio.is_empty() {
            return Ok(audio);
        }

        let mut denoised = Vec::with_capacity(audio.len());
        for frame in audio.samples.chunks(DENOISE_FRAME) {
            if frame.len() == DENOISE_FRAME {
                let out = self.model.denoise_frame(frame).await?;
                denoised.extend_from_slice(&out[..frame.len().min(out.len())]);
            } else {
                // Zero-pad the trailing partial frame, then cut back.
                let mut padded = frame.to_vec();
                padded.resize(DENOISE_FRAME, 0.0);
                let out = self.model.denoise_frame(&padded).await?;
                denoised.extend_from_slice(&out[..frame.len().min(out.len())]);
            }
        }
        denoised.resize(audio.len(), 0.0);

        let blended = audio
            .samples
            .iter()
            .zip(&denoised)
            .map(|(orig, den)| orig * (1.0 - self.strength) + den * self.strength)
            .collect();
        Ok(AudioBuffer::new(blended, audio.sample_rate))
    }
}

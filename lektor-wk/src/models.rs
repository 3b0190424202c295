//! External model collaborator traits
//!
//! The TTS, denoise and speech-to-text models are black boxes behind these
//! seams. Production implementations talk to the model server over HTTP
//! (see `client`); tests plug in deterministic fakes.

use async_trait::async_trait;

use lektor_common::Result;

use crate::audio::AudioBuffer;

/// Samples per denoise frame at the model's native rate.
pub const DENOISE_FRAME: usize = 480;

/// One synthesis call: chunk text plus resolved voice and decoding parameters.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    /// Reference voice id, empty for the model's default voice
    pub voice_id: String,
    pub language: String,
    pub temperature: f32,
    pub top_p: f32,
    pub repetition_penalty: f32,
    pub cfg_weight: f32,
    pub exaggeration: f32,
}

/// Neural text-to-speech model.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Map text + voice reference + decoding parameters to audio samples.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer>;
}

/// Spectral denoising model operating on fixed-size frames.
#[async_trait]
pub trait DenoiseModel: Send + Sync {
    /// Denoise one 480-sample frame.
    async fn denoise_frame(&self, frame: &[f32]) -> Result<Vec<f32>>;
}

/// Speech-to-text model used for transcript validation.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String>;
}

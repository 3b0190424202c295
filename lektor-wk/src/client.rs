//! HTTP clients for the model server
//!
//! The TTS, denoise and speech-to-text models run in a sidecar inference
//! server. Audio crosses the wire as WAV bytes; metadata as JSON.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use lektor_common::{Error, Result};

use crate::audio::{decode_wav_bytes, encode_wav_bytes, AudioBuffer};
use crate::models::{DenoiseModel, SpeechToText, SynthesisRequest, Synthesizer};

/// Synthesis can take minutes for long chunks on CPU-only hosts.
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(600);
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct ModelClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SynthesizeBody<'a> {
    text: &'a str,
    voice_id: &'a str,
    language: &'a str,
    temperature: f32,
    top_p: f32,
    repetition_penalty: f32,
    cfg_weight: f32,
    exaggeration: f32,
}

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
}

impl ModelClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(format!("build http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl Synthesizer for ModelClient {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<AudioBuffer> {
        let body = SynthesizeBody {
            text: &request.text,
            voice_id: &request.voice_id,
            language: &request.language,
            temperature: request.temperature,
            top_p: request.top_p,
            repetition_penalty: request.repetition_penalty,
            cfg_weight: request.cfg_weight,
            exaggeration: request.exaggeration,
        };
        let response = self
            .http
            .post(self.url("/synthesize"))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Synthesis(format!("model server unreachable: {e}")))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "model server returned {status}: {detail}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(format!("read synthesis response: {e}")))?;
        let audio = decode_wav_bytes(&bytes)?;
        if audio.is_empty() {
            return Err(Error::Synthesis("model produced empty audio".to_string()));
        }
        Ok(audio)
    }
}

#[async_trait]
impl DenoiseModel for ModelClient {
    async fn denoise_frame(&self, frame: &[f32]) -> Result<Vec<f32>> {
        // Frames are tiny; ship raw little-endian f32 and avoid WAV framing.
        let bytes: Vec<u8> = frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        let response = self
            .http
            .post(self.url("/denoise"))
            .timeout(TRANSCRIBE_TIMEOUT)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::PipelineStage {
                stage: "denoise".to_string(),
                message: format!("model server unreachable: {e}"),
            })?;

        if response.status() != StatusCode::OK {
            return Err(Error::PipelineStage {
                stage: "denoise".to_string(),
                message: format!("model server returned {}", response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::PipelineStage {
            stage: "denoise".to_string(),
            message: format!("read denoise response: {e}"),
        })?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}

#[async_trait]
impl SpeechToText for ModelClient {
    async fn transcribe(&self, audio: &AudioBuffer, language: &str) -> Result<String> {
        let wav = encode_wav_bytes(audio)?;
        let response = self
            .http
            .post(self.url("/transcribe"))
            .timeout(TRANSCRIBE_TIMEOUT)
            .query(&[("language", language)])
            .body(wav)
            .send()
            .await
            .map_err(|e| Error::Http(format!("transcribe request: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(Error::Http(format!(
                "transcribe returned {}",
                response.status()
            )));
        }

        let parsed: TranscribeResponse = response
            .json()
            .await
            .map_err(|e| Error::Http(format!("parse transcribe response: {e}")))?;
        Ok(parsed.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = ModelClient::new("http://localhost:8004/").unwrap();
        assert_eq!(client.url("/synthesize"), "http://localhost:8004/synthesize");
    }
}

//! Silence-trim stage
//!
//! Detects intervals whose energy stays below a percentage threshold and
//! removes them, retaining a margin around speech so onsets and offsets are
//! not clipped. Replaces an earlier external CLI trimmer that clipped
//! systematically.

use async_trait::async_trait;
use tracing::debug;

use lektor_common::Result;

use crate::audio::AudioBuffer;
use crate::pipeline::{ChunkContext, Stage};

const FRAME_LEN: usize = 2048;
const HOP_LEN: usize = 512;

pub struct TrimStage {
    /// Energy threshold as percent of the loudest frame (0.1..=10 typical)
    threshold_pct: f32,
    /// Seconds of audio retained on both sides of detected speech
    margin_s: f32,
}

impl TrimStage {
    pub fn new(threshold_pct: f32, margin_s: f32) -> Self {
        Self {
            threshold_pct: threshold_pct.max(0.01),
            margin_s: margin_s.max(0.0),
        }
    }

    /// Active (above-threshold) sample intervals, margin-padded and merged.
    fn active_intervals(&self, audio: &AudioBuffer) -> Vec<(usize, usize)> {
        let rms = frame_rms(&audio.samples);
        let reference = rms.iter().cloned().fold(0.0f32, f32::max);
        if reference <= 0.0 {
            return Vec::new();
        }

        // Convert the percentage threshold to a dB floor below the loudest
        // frame, mirroring top_db = -20*log10(threshold/100).
        let top_db = -20.0 * (self.threshold_pct / 100.0).log10();
        let floor = reference * 10f32.powf(-top_db / 20.0);

        // Frame flags -> sample intervals
        let mut intervals: Vec<(usize, usize)> = Vec::new();
        let mut start: Option<usize> = None;
        for (i, &level) in rms.iter().enumerate() {
            let frame_start = i * HOP_LEN;
            if level > floor {
                if start.is_none() {
                    start = Some(frame_start);
                }
            } else if let Some(s) = start.take() {
                intervals.push((s, frame_start + FRAME_LEN));
            }
        }
        if let Some(s) = start {
            intervals.push((s, audio.len()));
        }

        // Pad by the margin and merge overlaps.
        let margin = (self.margin_s * audio.sample_rate as f32) as usize;
        let mut merged: Vec<(usize, usize)> = Vec::new();
        for (s, e) in intervals {
            let s = s.saturating_sub(margin);
            let e = (e + margin).min(audio.len());
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        merged
    }
}

fn frame_rms(samples: &[f32]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let mut rms = Vec::new();
    let mut pos = 0;
    while pos < samples.len() {
        let end = (pos + FRAME_LEN).min(samples.len());
        let frame = &samples[pos..end];
        let energy: f32 = frame.iter().map(|s| s * s).sum::<f32>() / frame.len() as f32;
        rms.push(energy.sqrt());
        pos += HOP_LEN;
    }
    rms
}

#[async_trait]
impl Stage for TrimStage {
    fn name(&self) -> &'static str {
        "silence-trim"
    }

    async fn process(&self, audio: AudioBuffer, ctx: &ChunkContext) -> Result<AudioBuffer> {
        if audio.is_empty() {
            return Ok(audio);
        }

        let intervals = self.active_intervals(&audio);
        if intervals.is_empty() {
            // Entirely below threshold; removing everything would destroy
            // the chunk, so leave it untouched.
            debug!(
                job_id = %ctx.job_id,
                chapter = ctx.chapter_index,
                chunk = ctx.chunk_index,
                "silence trim: audio entirely below threshold, returning unmodified"
            );
            return Ok(audio);
        }

        let kept: usize = intervals.iter().map(|(s, e)| e - s).sum();
        let mut samples = Vec::with_capacity(kept);
        for &(s, e) in &intervals {
            samples.extend_from_slice(&audio.samples[s..e]);
        }
        debug!(
            job_id = %ctx.job_id,
            chapter = ctx.chapter_index,
            chunk = ctx.chunk_index,
            removed = audio.len() - samples.len(),
            intervals = intervals.len(),
            "silence trimmed"
        );
        Ok(AudioBuffer::new(samples, audio.sample_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ChunkContext {
        ChunkContext {
            job_id: "j".to_string(),
            chapter_index: 0,
            chunk_index: 0,
            worker_name: "wk-test".to_string(),
            text: String::new(),
        }
    }

    /// loud | silent | loud, one second each at 16kHz.
    fn loud_silent_loud() -> AudioBuffer {
        let mut samples = vec![0.5; 16000];
        samples.extend(vec![0.0; 16000]);
        samples.extend(vec![0.5; 16000]);
        AudioBuffer::new(samples, 16000)
    }

    #[tokio::test]
    async fn interior_silence_is_removed() {
        let stage = TrimStage::new(2.0, 0.0);
        let input = loud_silent_loud();
        let input_len = input.len();
        let out = stage.process(input, &ctx()).await.unwrap();
        // The silent middle second disappears (frame granularity leaves
        // a little slack at the boundaries).
        assert!(out.len() < input_len - 12000, "kept {} of {}", out.len(), input_len);
        assert!(out.len() >= 32000 - FRAME_LEN * 2);
    }

    #[tokio::test]
    async fn margin_retains_context_around_speech() {
        let tight = TrimStage::new(2.0, 0.0);
        let padded = TrimStage::new(2.0, 0.25);
        let a = tight.process(loud_silent_loud(), &ctx()).await.unwrap();
        let b = padded.process(loud_silent_loud(), &ctx()).await.unwrap();
        // 0.25s margin on both sides of both speech intervals keeps more audio
        assert!(b.len() > a.len() + 4000, "padded {} tight {}", b.len(), a.len());
    }

    #[tokio::test]
    async fn all_silent_audio_is_returned_unmodified() {
        let stage = TrimStage::new(2.0, 0.2);
        let input = AudioBuffer::new(vec![0.0; 8000], 16000);
        let out = stage.process(input.clone(), &ctx()).await.unwrap();
        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn uniform_speech_is_kept_whole() {
        let stage = TrimStage::new(2.0, 0.0);
        let input = AudioBuffer::new(vec![0.4; 16000], 16000);
        let out = stage.process(input.clone(), &ctx()).await.unwrap();
        assert_eq!(out.len(), input.len());
    }
}

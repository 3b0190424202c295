//! Transcript validation stage
//!
//! Re-transcribes the chunk audio through the speech-to-text collaborator
//! and compares it with the source text, case- and punctuation-insensitively.
//! A low similarity logs a warning tagged with the worker and chunk identity;
//! validation only fails the chunk when configured as a hard gate.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use lektor_common::{Error, Result};

use crate::audio::AudioBuffer;
use crate::models::SpeechToText;
use crate::pipeline::{ChunkContext, Stage};
use crate::resample::{resample, STT_SAMPLE_RATE};

pub struct ValidateStage {
    stt: Arc<dyn SpeechToText>,
    language: String,
    /// Similarity ratio below which a mismatch is reported
    threshold: f32,
    /// Fail the chunk on mismatch instead of warning
    hard_fail: bool,
}

impl ValidateStage {
    pub fn new(stt: Arc<dyn SpeechToText>, language: String, threshold: f32, hard_fail: bool) -> Self {
        Self {
            stt,
            language,
            threshold: threshold.clamp(0.0, 1.0),
            hard_fail,
        }
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn name(&self) -> &'static str {
        "transcript-validation"
    }

    async fn process(&self, audio: AudioBuffer, ctx: &ChunkContext) -> Result<AudioBuffer> {
        if audio.is_empty() || ctx.text.trim().is_empty() {
            return Ok(audio);
        }

        let stt_input = resample(&audio, STT_SAMPLE_RATE)?;
        let transcript = self.stt.transcribe(&stt_input, &self.language).await?;
        let score = similarity(&ctx.text, &transcript);

        if score < self.threshold {
            warn!(
                worker = %ctx.worker_name,
                job_id = %ctx.job_id,
                chapter = ctx.chapter_index,
                chunk = ctx.chunk_index,
                score,
                threshold = self.threshold,
                expected = %ctx.text,
                transcribed = %transcript,
                "transcript mismatch"
            );
            if self.hard_fail {
                return Err(Error::PipelineStage {
                    stage: "transcript-validation".to_string(),
                    message: format!(
                        "transcript similarity {score:.2} below threshold {:.2}",
                        self.threshold
                    ),
                });
            }
        } else {
            debug!(
                worker = %ctx.worker_name,
                job_id = %ctx.job_id,
                chapter = ctx.chapter_index,
                chunk = ctx.chunk_index,
                score,
                "transcript validated"
            );
        }
        Ok(audio)
    }
}

/// Word-level similarity ratio in [0, 1], insensitive to case and
/// punctuation: 2·LCS(a, b) / (|a| + |b|) over normalized word sequences.
pub fn similarity(expected: &str, actual: &str) -> f32 {
    let a = normalize_words(expected);
    let b = normalize_words(actual);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let lcs = lcs_len(&a, &b);
    2.0 * lcs as f32 / (a.len() + b.len()) as f32
}

fn normalize_words(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(|c| c.to_lowercase())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            current[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(current[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::mock::MockStt;

    fn ctx(text: &str) -> ChunkContext {
        ChunkContext {
            job_id: "j".to_string(),
            chapter_index: 1,
            chunk_index: 2,
            worker_name: "wk-test".to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn identical_texts_score_one() {
        assert_eq!(similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn case_and_punctuation_are_ignored() {
        assert_eq!(similarity("Hello, world!", "hello world"), 1.0);
        assert_eq!(similarity("Dzień dobry.", "dzień DOBRY"), 1.0);
    }

    #[test]
    fn disjoint_texts_score_zero() {
        assert_eq!(similarity("alpha beta", "gamma delta"), 0.0);
    }

    #[test]
    fn partial_overlap_scores_in_between() {
        let score = similarity("the quick brown fox", "the slow brown fox");
        assert!((score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn empty_against_nonempty_scores_zero() {
        assert_eq!(similarity("", "something"), 0.0);
        assert_eq!(similarity("...", "..."), 1.0);
    }

    #[tokio::test]
    async fn advisory_mismatch_passes_audio_through() {
        let stage = ValidateStage::new(
            Arc::new(MockStt::new("completely different words")),
            "en".to_string(),
            0.8,
            false,
        );
        let audio = AudioBuffer::new(vec![0.1; 1600], 16000);
        let out = stage.process(audio.clone(), &ctx("hello there")).await.unwrap();
        assert_eq!(out, audio);
    }

    #[tokio::test]
    async fn hard_gate_fails_chunk_on_mismatch() {
        let stage = ValidateStage::new(
            Arc::new(MockStt::new("completely different words")),
            "en".to_string(),
            0.8,
            true,
        );
        let audio = AudioBuffer::new(vec![0.1; 1600], 16000);
        let err = stage.process(audio, &ctx("hello there")).await.unwrap_err();
        assert!(matches!(err, Error::PipelineStage { .. }));
    }

    #[tokio::test]
    async fn matching_transcript_passes_hard_gate() {
        let stage = ValidateStage::new(
            Arc::new(MockStt::new("hello there friend")),
            "en".to_string(),
            0.8,
            true,
        );
        let audio = AudioBuffer::new(vec![0.1; 1600], 16000);
        let out = stage
            .process(audio.clone(), &ctx("Hello there, friend!"))
            .await
            .unwrap();
        assert_eq!(out, audio);
    }
}

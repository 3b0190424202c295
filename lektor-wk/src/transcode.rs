//! Transcoder collaborator: loudness normalization and container encoding
//!
//! Production implementation shells out to ffmpeg (loudnorm filter for
//! normalization, lame/vorbis encoders for lossy output). When ffmpeg is not
//! installed the worker degrades to plain WAV output with a warning instead
//! of failing jobs.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use lektor_common::{Error, Result};

use crate::audio::{read_wav, write_wav, AudioBuffer};

#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalize a buffer to the target integrated loudness.
    async fn normalize(&self, audio: &AudioBuffer, target_lufs: f32) -> Result<AudioBuffer>;

    /// Encode a buffer into the requested container at the given bitrate.
    async fn encode(
        &self,
        audio: &AudioBuffer,
        format: &str,
        bitrate_kbps: u32,
        out_path: &Path,
    ) -> Result<()>;

    /// Whether this transcoder can produce the requested container.
    fn supports_format(&self, format: &str) -> bool;
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_wav_path(tag: &str) -> PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("lektor-{}-{tag}-{n}.wav", std::process::id()))
}

/// ffmpeg-backed transcoder.
pub struct FfmpegTranscoder;

impl FfmpegTranscoder {
    /// Probe for a usable ffmpeg on PATH.
    pub async fn probe() -> bool {
        Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn run_ffmpeg(args: &[&str]) -> Result<()> {
        let output = Command::new("ffmpeg")
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Transcode(format!("failed to run ffmpeg: {e}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Transcode(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn normalize(&self, audio: &AudioBuffer, target_lufs: f32) -> Result<AudioBuffer> {
        let input = temp_wav_path("norm-in");
        let output = temp_wav_path("norm-out");
        write_wav(&input, audio)?;

        let filter = format!("loudnorm=I={target_lufs}:TP=-1.5:LRA=11");
        let rate = audio.sample_rate.to_string();
        let result = Self::run_ffmpeg(&[
            "-i",
            input.to_str().unwrap_or_default(),
            "-af",
            &filter,
            "-ar",
            &rate,
            output.to_str().unwrap_or_default(),
        ])
        .await;

        let _ = std::fs::remove_file(&input);
        result?;
        let normalized = read_wav(&output);
        let _ = std::fs::remove_file(&output);
        normalized
    }

    async fn encode(
        &self,
        audio: &AudioBuffer,
        format: &str,
        bitrate_kbps: u32,
        out_path: &Path,
    ) -> Result<()> {
        if format == "wav" {
            return write_wav(out_path, audio);
        }
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let input = temp_wav_path("enc-in");
        write_wav(&input, audio)?;
        let bitrate = format!("{bitrate_kbps}k");
        let result = Self::run_ffmpeg(&[
            "-i",
            input.to_str().unwrap_or_default(),
            "-b:a",
            &bitrate,
            out_path.to_str().unwrap_or_default(),
        ])
        .await;
        let _ = std::fs::remove_file(&input);
        result
    }

    fn supports_format(&self, format: &str) -> bool {
        matches!(format, "wav" | "mp3" | "ogg" | "flac")
    }
}

/// Fallback transcoder used when ffmpeg is missing: no loudness processing,
/// WAV output only.
pub struct NullTranscoder;

#[async_trait]
impl Transcoder for NullTranscoder {
    async fn normalize(&self, audio: &AudioBuffer, _target_lufs: f32) -> Result<AudioBuffer> {
        warn!("ffmpeg unavailable, skipping loudness normalization");
        Ok(audio.clone())
    }

    async fn encode(
        &self,
        audio: &AudioBuffer,
        format: &str,
        _bitrate_kbps: u32,
        out_path: &Path,
    ) -> Result<()> {
        if format != "wav" {
            return Err(Error::Transcode(format!(
                "cannot encode {format} without ffmpeg"
            )));
        }
        write_wav(out_path, audio)
    }

    fn supports_format(&self, format: &str) -> bool {
        format == "wav"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_transcoder_passes_audio_through() {
        let audio = AudioBuffer::new(vec![0.1, -0.2, 0.3], 24000);
        let out = NullTranscoder.normalize(&audio, -18.0).await.unwrap();
        assert_eq!(out, audio);
    }

    #[tokio::test]
    async fn null_transcoder_writes_wav_and_rejects_lossy() {
        let dir = tempfile::tempdir().unwrap();
        let audio = AudioBuffer::new(vec![0.1; 240], 24000);

        let wav_path = dir.path().join("out.wav");
        NullTranscoder
            .encode(&audio, "wav", 128, &wav_path)
            .await
            .unwrap();
        assert!(wav_path.exists());

        let err = NullTranscoder
            .encode(&audio, "mp3", 128, &dir.path().join("out.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transcode(_)));
    }

    #[test]
    fn format_support_matrix() {
        assert!(FfmpegTranscoder.supports_format("mp3"));
        assert!(FfmpegTranscoder.supports_format("wav"));
        assert!(!FfmpegTranscoder.supports_format("aiff"));
        assert!(NullTranscoder.supports_format("wav"));
        assert!(!NullTranscoder.supports_format("mp3"));
    }
}

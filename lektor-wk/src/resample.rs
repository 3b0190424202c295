//! Audio resampling using rubato
//!
//! Two consumers: the transcript-validation stage downsamples to 16 kHz for
//! the speech-to-text model, and the per-voice speed effect time-scales a
//! chunk by resampling it and keeping the original playback rate.

use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};

use lektor_common::{Error, Result};

use crate::audio::AudioBuffer;

/// Sample rate the speech-to-text model expects.
pub const STT_SAMPLE_RATE: u32 = 16000;

/// Resample a mono buffer to a new rate.
pub fn resample(audio: &AudioBuffer, output_rate: u32) -> Result<AudioBuffer> {
    if audio.sample_rate == output_rate || audio.is_empty() {
        return Ok(AudioBuffer::new(audio.samples.clone(), output_rate));
    }
    let ratio = output_rate as f64 / audio.sample_rate as f64;
    let samples = run_resampler(&audio.samples, ratio)?;
    Ok(AudioBuffer::new(samples, output_rate))
}

/// Time-scale a chunk by `speed_factor` (1.0 = unchanged, 2.0 = twice as
/// fast). Implemented by resampling the content and keeping the playback
/// rate, so pitch shifts with speed.
pub fn apply_speed(audio: &AudioBuffer, speed_factor: f32) -> Result<AudioBuffer> {
    if !(speed_factor.is_finite() && speed_factor > 0.0) {
        return Err(Error::InvalidInput(format!(
            "speed factor must be positive, got {speed_factor}"
        )));
    }
    if (speed_factor - 1.0).abs() < f32::EPSILON || audio.is_empty() {
        return Ok(audio.clone());
    }
    let samples = run_resampler(&audio.samples, 1.0 / speed_factor as f64)?;
    Ok(AudioBuffer::new(samples, audio.sample_rate))
}

fn run_resampler(input: &[f32], ratio: f64) -> Result<Vec<f32>> {
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio, no runtime changes
        PolynomialDegree::Septic,
        input.len(),
        1,
    )
    .map_err(|e| Error::Internal(format!("create resampler: {e}")))?;

    let mut output = resampler
        .process(&[input.to_vec()], None)
        .map_err(|e| Error::Internal(format!("resampling failed: {e}")))?;
    Ok(output.remove(0))
}

//! In-memory audio buffers and WAV I/O
//!
//! All pipeline stages operate on mono f32 buffers. Chunk artifacts are
//! written as 16-bit PCM WAV; lossy containers are produced later by the
//! transcoder.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use lektor_common::{Error, Result};

/// Mono audio samples with their sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A buffer of silence with the given duration.
    pub fn silence(duration_ms: u32, sample_rate: u32) -> Self {
        let len = (sample_rate as u64 * duration_ms as u64 / 1000) as usize;
        Self {
            samples: vec![0.0; len],
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Peak absolute amplitude.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }
}

fn wav_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Write a buffer to a 16-bit PCM WAV file.
pub fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = WavWriter::create(path, wav_spec(audio.sample_rate))
        .map_err(|e| Error::Io(std::io::Error::other(format!("wav create: {e}"))))?;
    for &sample in &audio.samples {
        let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        writer
            .write_sample(clamped)
            .map_err(|e| Error::Io(std::io::Error::other(format!("wav write: {e}"))))?;
    }
    writer
        .finalize()
        .map_err(|e| Error::Io(std::io::Error::other(format!("wav finalize: {e}"))))?;
    Ok(())
}

/// Encode a buffer to 16-bit PCM WAV bytes in memory.
pub fn encode_wav_bytes(audio: &AudioBuffer) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, wav_spec(audio.sample_rate))
            .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
        for &sample in &audio.samples {
            let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(clamped)
                .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| Error::Internal(format!("wav encode: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Read a mono buffer from a WAV file. Multi-channel input is downmixed.
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)
        .map_err(|e| Error::Io(std::io::Error::other(format!("wav open: {e}"))))?;
    decode_reader(reader)
}

/// Decode WAV bytes received from a model server.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<AudioBuffer> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::Internal(format!("wav decode: {e}")))?;
    decode_reader(reader)
}

fn decode_reader<R: std::io::Read>(mut reader: WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Internal(format!("wav samples: {e}")))?,
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Internal(format!("wav samples: {e}")))?
        }
    };

    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioBuffer::new(samples, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, duration_s: f32, sample_rate: u32) -> AudioBuffer {
        let len = (duration_s * sample_rate as f32) as usize;
        let samples = (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate as f32).sin() * 0.5)
            .collect();
        AudioBuffer::new(samples, sample_rate)
    }

    #[test]
    fn silence_has_expected_length() {
        let buf = AudioBuffer::silence(500, 24000);
        assert_eq!(buf.len(), 12000);
        assert_eq!(buf.peak(), 0.0);
    }

    #[test]
    fn wav_round_trip_preserves_shape() {
        let original = sine(440.0, 0.1, 24000);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.wav");

        write_wav(&path, &original).unwrap();
        let decoded = read_wav(&path).unwrap();

        assert_eq!(decoded.sample_rate, 24000);
        assert_eq!(decoded.len(), original.len());
        // 16-bit quantization keeps samples within ~1e-4 of the original
        for (a, b) in original.samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() < 1e-3);
        }
    }

    #[test]
    fn wav_bytes_round_trip() {
        let original = sine(220.0, 0.05, 16000);
        let bytes = encode_wav_bytes(&original).unwrap();
        let decoded = decode_wav_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.len(), original.len());
    }

    #[test]
    fn duration_reflects_sample_rate() {
        let buf = AudioBuffer::silence(250, 48000);
        assert!((buf.duration_secs() - 0.25).abs() < 1e-9);
    }
}

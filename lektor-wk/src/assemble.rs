//! Chunk and chapter assembly
//!
//! Concatenates completed chunk buffers into a chapter buffer with configured
//! intro silence, inter-chunk gaps and optional crossfades, and chapter
//! buffers into the final job buffer. Loudness normalization and container
//! encoding happen afterwards through the transcoder collaborator.

use lektor_common::fade_curves::FadeCurve;
use lektor_common::params::PipelineParams;

use crate::audio::AudioBuffer;

/// One completed chunk ready for assembly.
#[derive(Debug, Clone)]
pub struct ChunkAudio {
    pub chunk_index: i64,
    pub speaker: String,
    pub audio: AudioBuffer,
}

/// Order chunks for assembly: source order, or grouped by speaker with
/// source order preserved inside each group.
pub fn order_chunks(mut chunks: Vec<ChunkAudio>, group_by_speaker: bool) -> Vec<ChunkAudio> {
    chunks.sort_by_key(|c| c.chunk_index);
    if group_by_speaker {
        // Groups appear in order of each speaker's first chunk.
        let mut speaker_rank: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !speaker_rank.contains(&chunk.speaker) {
                speaker_rank.push(chunk.speaker.clone());
            }
        }
        chunks.sort_by_key(|c| {
            let rank = speaker_rank.iter().position(|s| s == &c.speaker).unwrap_or(0);
            (rank, c.chunk_index)
        });
    }
    chunks
}

/// Assemble a chapter buffer from ordered chunks.
///
/// Layout: intro silence, then chunks separated by the configured gap
/// (inter-chunk silence plus sentence pause). With a zero gap and a non-zero
/// crossfade the chunks overlap under an equal-power crossfade; with a gap,
/// the crossfade length is used as a declick ramp on chunk edges instead.
pub fn assemble_chapter(
    chunks: &[ChunkAudio],
    params: &PipelineParams,
    sample_rate: u32,
) -> AudioBuffer {
    let gap_ms = params.inter_chunk_silence_ms + params.sentence_pause_ms;
    let fade_samples = (sample_rate as u64 * params.crossfade_ms as u64 / 1000) as usize;

    let mut out = AudioBuffer::silence(params.intro_silence_ms, sample_rate);
    for (i, chunk) in chunks.iter().enumerate() {
        let mut piece = chunk.audio.clone();
        if fade_samples > 0 && gap_ms > 0 {
            apply_edge_fades(&mut piece, fade_samples);
        }
        if i == 0 || gap_ms > 0 || fade_samples == 0 {
            if i > 0 {
                out.samples
                    .extend(AudioBuffer::silence(gap_ms, sample_rate).samples);
            }
            out.samples.extend(piece.samples);
        } else {
            crossfade_append(&mut out, &piece, fade_samples, FadeCurve::EqualPower);
        }
    }
    out.sample_rate = sample_rate;
    out
}

/// Concatenate normalized chapter buffers into the final job buffer.
pub fn assemble_job(chapters: &[AudioBuffer], sample_rate: u32) -> AudioBuffer {
    let total: usize = chapters.iter().map(|c| c.len()).sum();
    let mut samples = Vec::with_capacity(total);
    for chapter in chapters {
        samples.extend_from_slice(&chapter.samples);
    }
    AudioBuffer::new(samples, sample_rate)
}

/// Overlap the head of `src` with the tail of `dst` under a crossfade.
fn crossfade_append(dst: &mut AudioBuffer, src: &AudioBuffer, fade_samples: usize, curve: FadeCurve) {
    let fade = fade_samples.min(dst.len()).min(src.len());
    if fade == 0 {
        dst.samples.extend_from_slice(&src.samples);
        return;
    }
    let dst_start = dst.len() - fade;
    for i in 0..fade {
        let t = i as f32 / fade as f32;
        let mixed = dst.samples[dst_start + i] * curve.fade_out(t) + src.samples[i] * curve.fade_in(t);
        dst.samples[dst_start + i] = mixed;
    }
    dst.samples.extend_from_slice(&src.samples[fade..]);
}

/// Short linear ramps at both chunk edges to avoid boundary clicks.
fn apply_edge_fades(audio: &mut AudioBuffer, fade_samples: usize) {
    let fade = fade_samples.min(audio.len() / 2);
    if fade == 0 {
        return;
    }
    let len = audio.len();
    for i in 0..fade {
        let t = i as f32 / fade as f32;
        audio.samples[i] *= FadeCurve::Linear.fade_in(t);
        audio.samples[len - 1 - i] *= FadeCurve::Linear.fade_in(t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1000; // 1 sample per ms keeps the arithmetic readable

    fn chunk(index: i64, speaker: &str, len: usize) -> ChunkAudio {
        ChunkAudio {
            chunk_index: index,
            speaker: speaker.to_string(),
            audio: AudioBuffer::new(vec![0.5; len], SR),
        }
    }

    fn params() -> PipelineParams {
        PipelineParams {
            intro_silence_ms: 0,
            inter_chunk_silence_ms: 0,
            sentence_pause_ms: 0,
            crossfade_ms: 0,
            group_by_speaker: false,
            ..PipelineParams::default()
        }
    }

    #[test]
    fn plain_concat_sums_lengths() {
        let chunks = vec![chunk(0, "a", 100), chunk(1, "a", 200)];
        let out = assemble_chapter(&chunks, &params(), SR);
        assert_eq!(out.len(), 300);
    }

    #[test]
    fn intro_and_gap_silence_are_inserted() {
        let p = PipelineParams {
            intro_silence_ms: 50,
            inter_chunk_silence_ms: 20,
            sentence_pause_ms: 30,
            ..params()
        };
        let chunks = vec![chunk(0, "a", 100), chunk(1, "a", 100)];
        let out = assemble_chapter(&chunks, &p, SR);
        // 50 intro + 100 + (20+30) gap + 100
        assert_eq!(out.len(), 300);
        assert!(out.samples[..50].iter().all(|&s| s == 0.0));
        assert!(out.samples[150..200].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn crossfade_overlaps_adjacent_chunks() {
        let p = PipelineParams {
            crossfade_ms: 40,
            ..params()
        };
        let chunks = vec![chunk(0, "a", 100), chunk(1, "a", 100)];
        let out = assemble_chapter(&chunks, &p, SR);
        // 40ms overlap: 100 + 100 - 40
        assert_eq!(out.len(), 160);
        // Equal-power crossfade of equal signals stays close to the level
        let mid = out.samples[80];
        assert!(mid > 0.4 && mid <= 0.75, "mid sample {mid}");
    }

    #[test]
    fn crossfade_with_gap_becomes_edge_fade() {
        let p = PipelineParams {
            crossfade_ms: 10,
            sentence_pause_ms: 50,
            ..params()
        };
        let chunks = vec![chunk(0, "a", 100), chunk(1, "a", 100)];
        let out = assemble_chapter(&chunks, &p, SR);
        // No overlap: 100 + 50 + 100
        assert_eq!(out.len(), 250);
        // First sample of each chunk is faded to zero
        assert_eq!(out.samples[0], 0.0);
    }

    #[test]
    fn speaker_grouping_preserves_inner_order() {
        let chunks = vec![
            chunk(0, "anna", 10),
            chunk(1, "bob", 10),
            chunk(2, "anna", 10),
            chunk(3, "bob", 10),
        ];
        let ordered = order_chunks(chunks, true);
        let keys: Vec<(String, i64)> = ordered
            .iter()
            .map(|c| (c.speaker.clone(), c.chunk_index))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("anna".to_string(), 0),
                ("anna".to_string(), 2),
                ("bob".to_string(), 1),
                ("bob".to_string(), 3),
            ]
        );
    }

    #[test]
    fn source_order_is_default() {
        let chunks = vec![chunk(2, "b", 10), chunk(0, "a", 10), chunk(1, "b", 10)];
        let ordered = order_chunks(chunks, false);
        let indices: Vec<i64> = ordered.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn job_assembly_concatenates_chapters() {
        let chapters = vec![
            AudioBuffer::new(vec![0.1; 100], SR),
            AudioBuffer::new(vec![0.2; 50], SR),
        ];
        let out = assemble_job(&chapters, SR);
        assert_eq!(out.len(), 150);
        assert_eq!(out.samples[0], 0.1);
        assert_eq!(out.samples[100], 0.2);
    }
}

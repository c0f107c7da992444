//! Encoded audio clips handed from capture to transcription

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{Error, Result};

/// MIME type of clips produced by the capture unit
pub const WAV_MIME: &str = "audio/wav";

/// One utterance worth of encoded audio
///
/// Produced by the capture unit when its window elapses and moved into the
/// transcriber, which drops it once the request completes.
#[derive(Clone)]
pub struct AudioClip {
    handle: Uuid,
    bytes: Vec<u8>,
    mime: &'static str,
    sample_count: usize,
    sample_rate: u32,
    captured_at: DateTime<Utc>,
}

impl AudioClip {
    /// Encode mono samples into a WAV clip
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Result<Self> {
        let bytes = samples_to_wav(samples, sample_rate)?;
        Ok(Self {
            handle: Uuid::new_v4(),
            bytes,
            mime: WAV_MIME,
            sample_count: samples.len(),
            sample_rate,
            captured_at: Utc::now(),
        })
    }

    /// Opaque handle identifying this clip in logs
    #[must_use]
    pub const fn handle(&self) -> Uuid {
        self.handle
    }

    /// Encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// MIME descriptor of the encoding
    #[must_use]
    pub const fn mime(&self) -> &'static str {
        self.mime
    }

    /// True when the recording window captured no samples at all
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        self.sample_count == 0
    }

    /// Length of the recorded audio
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.sample_count as f64 / f64::from(self.sample_rate))
    }

    /// When the capture finalized
    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("handle", &self.handle)
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .field("duration", &self.duration())
            .finish()
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Resample mono audio between rates using rubato
///
/// The trailing partial chunk is zero-padded so short utterances survive.
///
/// # Errors
///
/// Returns error if the resampler cannot be built or fails
#[allow(clippy::cast_possible_truncation)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let mut output = Vec::new();

    for chunk in input.chunks(chunk_size) {
        let mut block = chunk.to_vec();
        block.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Drop the padding added to the final block
    let expected = samples.len() * to_rate as usize / from_rate as usize;
    output.truncate(expected);

    Ok(output.iter().map(|&s| s as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_metadata() {
        let samples = vec![0.1f32; 8000];
        let clip = AudioClip::from_samples(&samples, 16000).unwrap();

        assert_eq!(clip.mime(), "audio/wav");
        assert_eq!(clip.duration(), Duration::from_millis(500));
        assert!(!clip.is_silent());
        assert_eq!(&clip.bytes()[0..4], b"RIFF");
    }

    #[test]
    fn test_empty_clip_is_silent() {
        let clip = AudioClip::from_samples(&[], 16000).unwrap();
        assert!(clip.is_silent());
        assert_eq!(clip.duration(), Duration::ZERO);
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let samples = vec![0.25f32, -0.25, 0.5];
        assert_eq!(resample(&samples, 16000, 16000).unwrap(), samples);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = vec![0.0f32; 4096];
        let out = resample(&samples, 32000, 16000).unwrap();
        assert!(out.len() <= 2048 && out.len() > 1500, "got {}", out.len());
    }
}

//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Plays audio to the default output device
///
/// Playback blocks the calling thread; run it under `spawn_blocking`. Setting
/// the shared stop flag cuts the current clip short.
pub struct AudioPlayback {
    config: StreamConfig,
    stop: Arc<AtomicBool>,
}

impl AudioPlayback {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no usable output device exists
    pub fn new(stop: Arc<AtomicBool>) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
        };

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && supports_rate(c))
            .or_else(|| {
                // Fallback: try stereo
                device
                    .supported_output_configs()
                    .ok()?
                    .find(|c| c.channels() == 2 && supports_rate(c))
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config, stop })
    }

    /// Decode MP3 bytes and play them to completion or until stopped
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub fn play_mp3_blocking(&self, mp3_data: &[u8]) -> Result<()> {
        let samples = decode_mp3(mp3_data)?;
        self.play_samples_blocking(samples)
    }

    /// Play mono samples at [`PLAYBACK_SAMPLE_RATE`]
    ///
    /// # Errors
    ///
    /// Returns error if the output stream cannot be built
    pub fn play_samples_blocking(&self, samples: Vec<f32>) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));

        let samples_cb = Arc::clone(&samples);
        let position_cb = Arc::clone(&position);
        let stop_cb = Arc::clone(&self.stop);

        let stream = device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let stopped = stop_cb.load(Ordering::Relaxed);
                    let mut pos = position_cb.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = if stopped {
                            0.0
                        } else {
                            samples_cb.get(pos).copied().unwrap_or(0.0)
                        };
                        frame.fill(sample);
                        if pos < samples_cb.len() {
                            pos += 1;
                        }
                    }
                    position_cb.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = Instant::now();
        let timeout = Duration::from_millis(duration_ms + 500);

        while position.load(Ordering::Relaxed) < sample_count {
            if self.stop.load(Ordering::Relaxed) {
                tracing::debug!("playback interrupted");
                break;
            }
            if start.elapsed() > timeout {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");

        Ok(())
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error on a corrupt frame
pub fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_is_empty() {
        assert!(decode_mp3(&[]).unwrap().is_empty());
    }
}

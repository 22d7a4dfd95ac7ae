//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// How often the blocking player checks for completion or stop
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Plays encoded audio and reports completion
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// Play `audio` until it finishes or `stop` is cancelled
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] for malformed audio
    /// - [`Error::Canceled`] if `stop` fired before playback finished
    /// - [`Error::AudioUnavailable`] if the output device fails
    async fn play(&self, audio: Bytes, stop: CancellationToken) -> Result<()>;
}

/// Plays audio through the default output device
pub struct CpalPlayback;

impl CpalPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioUnavailable("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self)
    }
}

#[async_trait]
impl PlaybackEngine for CpalPlayback {
    async fn play(&self, audio: Bytes, stop: CancellationToken) -> Result<()> {
        let (samples, sample_rate) = decode_audio(&audio)?;

        tokio::task::spawn_blocking(move || play_samples_blocking(&samples, sample_rate, &stop))
            .await
            .map_err(|e| Error::AudioUnavailable(format!("playback task failed: {e}")))?
    }
}

/// Find an output config for `sample_rate`, mono first then stereo
fn output_config(device: &Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |channels: u16| {
        device
            .supported_output_configs()
            .ok()?
            .find(|c| {
                c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
            })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| Error::AudioUnavailable("no suitable output config found".to_string()))?;

    Ok(supported.with_sample_rate(rate).config())
}

/// Play samples in a blocking manner
fn play_samples_blocking(samples: &[f32], sample_rate: u32, stop: &CancellationToken) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioUnavailable("no output device".to_string()))?;

    let config = output_config(&device, sample_rate)?;
    let channels = usize::from(config.channels);

    let samples: Arc<[f32]> = Arc::from(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = if let Some(&s) = samples.get(pos) {
                            position.store(pos + 1, Ordering::Relaxed);
                            s
                        } else {
                            finished.store(true, Ordering::Release);
                            0.0
                        };

                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::AudioUnavailable(e.to_string()))?
    };

    stream
        .play()
        .map_err(|e| Error::AudioUnavailable(e.to_string()))?;

    let duration_ms = (samples.len() as u64 * 1000) / u64::from(sample_rate);
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Acquire) {
        if stop.is_cancelled() {
            drop(stream);
            tracing::debug!(
                played = position.load(Ordering::Relaxed),
                total = samples.len(),
                "playback stopped"
            );
            return Err(Error::Canceled);
        }
        if Instant::now() > deadline {
            tracing::warn!("playback did not drain before deadline");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    drop(stream);
    tracing::debug!(samples = samples.len(), "playback complete");

    Ok(())
}

/// Decode WAV or MP3 bytes to mono f32 samples and their sample rate
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is not decodable audio
pub fn decode_audio(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(format!("WAV decode error: {e}")))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = None;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate.get_or_insert(frame.sample_rate);
                let interleaved: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&interleaved, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    let rate = sample_rate
        .and_then(|r| u32::try_from(r).ok())
        .filter(|&r| r > 0)
        .ok_or_else(|| Error::Decode("no audio frames in payload".to_string()))?;

    Ok((samples, rate))
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::samples_to_wav;

    #[test]
    fn test_decode_wav_roundtrips_rate_and_length() {
        let wav = samples_to_wav(&[0.0, 0.5, -0.5, 0.25], 16000).unwrap();
        let (samples, rate) = decode_audio(&wav).unwrap();

        assert_eq!(rate, 16000);
        assert_eq!(samples.len(), 4);
        assert!((samples[1] - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let err = decode_audio(b"definitely not audio").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_truncated_wav_is_decode_error() {
        let err = decode_audio(b"RIFF\x00\x00").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.2, 0.4, -1.0, 1.0], 2);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.3).abs() < f32::EPSILON);
        assert!(mono[1].abs() < f32::EPSILON);
    }
}

//! Microphone capture
//!
//! The input stream is opened at [`SAMPLE_RATE`] and folded down to mono
//! inside the cpal callback, so everything downstream (segmenter, WAV
//! encoder) only ever sees 16 kHz mono `f32`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig, SupportedStreamConfigRange};
use tokio_util::sync::CancellationToken;

use super::segmenter::{SegmentEvent, UtteranceSegmenter};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often [`record_utterance`] drains the microphone buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A running microphone stream
///
/// Holds a cpal stream, so it must stay on the thread that opened it.
/// Dropping it closes the device.
pub struct AudioCapture {
    buffer: Arc<Mutex<Vec<f32>>>,
    _stream: Stream,
}

impl AudioCapture {
    /// Open the default input device and start recording
    ///
    /// # Errors
    ///
    /// Returns [`Error::AudioUnavailable`] if there is no input device or
    /// it cannot record 16 kHz float audio
    pub fn open() -> Result<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| Error::AudioUnavailable("no input device available".to_string()))?;

        let config = input_config(&device)?;
        let channels = usize::from(config.channels);

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    append_mono(&mut buf, data, channels);
                },
                |err| tracing::error!(error = %err, "audio capture error"),
                None,
            )
            .map_err(|e| Error::AudioUnavailable(e.to_string()))?;

        stream
            .play()
            .map_err(|e| Error::AudioUnavailable(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            channels,
            "audio capture started"
        );

        Ok(Self {
            buffer,
            _stream: stream,
        })
    }

    /// Take the mono samples recorded since the last drain
    #[must_use]
    pub fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut *self.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Pick a float input config at 16 kHz, fewest channels first
fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let rate = SampleRate(SAMPLE_RATE);
    let usable = |c: &SupportedStreamConfigRange| {
        c.sample_format() == SampleFormat::F32
            && c.min_sample_rate() <= rate
            && c.max_sample_rate() >= rate
    };

    device
        .supported_input_configs()
        .map_err(|e| Error::AudioUnavailable(e.to_string()))?
        .filter(usable)
        .min_by_key(SupportedStreamConfigRange::channels)
        .map(|c| c.with_sample_rate(rate).config())
        .ok_or_else(|| Error::AudioUnavailable("no 16 kHz input config found".to_string()))
}

/// Append interleaved `data` to `buf`, averaging each frame to one sample
#[allow(clippy::cast_precision_loss)]
fn append_mono(buf: &mut Vec<f32>, data: &[f32], channels: usize) {
    if channels <= 1 {
        buf.extend_from_slice(data);
        return;
    }

    let scale = 1.0 / channels as f32;
    buf.extend(
        data.chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// Record from the microphone until one utterance completes
///
/// Blocks the calling thread. Returns `Ok(None)` if `stop` fires first.
///
/// # Errors
///
/// Returns [`Error::AudioUnavailable`] if the microphone cannot be opened
pub fn record_utterance(stop: &CancellationToken) -> Result<Option<Vec<f32>>> {
    let capture = AudioCapture::open()?;
    Ok(segment_until(stop, || {
        std::thread::sleep(POLL_INTERVAL);
        capture.drain()
    }))
}

/// Feed chunks from `next_chunk` to a segmenter until an utterance closes
fn segment_until(
    stop: &CancellationToken,
    mut next_chunk: impl FnMut() -> Vec<f32>,
) -> Option<Vec<f32>> {
    let mut segmenter = UtteranceSegmenter::new();
    while !stop.is_cancelled() {
        match segmenter.process(&next_chunk()) {
            Some(SegmentEvent::SpeechStarted) => tracing::debug!("speech started"),
            Some(SegmentEvent::Utterance(samples)) => return Some(samples),
            None => {}
        }
    }
    None
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
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| Error::Recognition(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Recognition(e.to_string()))?;
        }

        writer
            .finalize()
            .map_err(|e| Error::Recognition(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

//! Utterance segmentation
//!
//! Splits a microphone stream into utterances using local energy
//! detection: speech followed by enough silence closes an utterance.

use super::capture::SAMPLE_RATE;

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = (SAMPLE_RATE as usize * 3) / 10; // 0.3 seconds

/// Silence duration to consider end of utterance (in samples)
const SILENCE_SAMPLES: usize = SAMPLE_RATE as usize / 2; // 0.5 seconds

/// State of the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// Waiting for speech
    Idle,
    /// Speech detected, accumulating
    Speaking,
}

/// Result of feeding a chunk of audio
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentEvent {
    /// Speech began in this chunk
    SpeechStarted,
    /// A complete utterance, speech plus trailing silence
    Utterance(Vec<f32>),
}

/// Energy-based utterance segmenter
pub struct UtteranceSegmenter {
    state: SegmenterState,
    speech_buffer: Vec<f32>,
    silence_counter: usize,
}

impl UtteranceSegmenter {
    /// Create a segmenter in the idle state
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Idle,
            speech_buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed audio samples
    pub fn process(&mut self, samples: &[f32]) -> Option<SegmentEvent> {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Idle => {
                if is_speech {
                    self.state = SegmenterState::Speaking;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech detected");
                    return Some(SegmentEvent::SpeechStarted);
                }
                None
            }
            SegmenterState::Speaking => {
                self.speech_buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > SILENCE_SAMPLES {
                    let utterance = std::mem::take(&mut self.speech_buffer);
                    self.reset();

                    if utterance.len() > MIN_SPEECH_SAMPLES + SILENCE_SAMPLES {
                        tracing::debug!(samples = utterance.len(), "utterance complete");
                        return Some(SegmentEvent::Utterance(utterance));
                    }
                    tracing::trace!("speech too short, discarded");
                }
                None
            }
        }
    }

    /// Reset to idle, dropping buffered audio
    pub fn reset(&mut self) {
        self.state = SegmenterState::Idle;
        self.speech_buffer.clear();
        self.silence_counter = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

impl Default for UtteranceSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

//! Audio hardware collaborators
//!
//! Playback, capture and device activation on the default cpal host,
//! plus energy-based utterance segmentation for the microphone stream.

mod capture;
mod device;
mod playback;
mod segmenter;

pub use capture::{AudioCapture, SAMPLE_RATE, record_utterance, samples_to_wav};
pub use device::SystemAudioDevice;
pub use playback::{CpalPlayback, PlaybackEngine, decode_audio};
pub use segmenter::{SegmentEvent, SegmenterState, UtteranceSegmenter};

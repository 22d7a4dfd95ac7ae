//! Platform audio device activation

use cpal::traits::{DeviceTrait, HostTrait};

use crate::arbiter::{AudioDevice, AudioMode};
use crate::{Error, Result};

/// Audio device backed by the default cpal host
///
/// Activation verifies that the device for the mode is present; the
/// streams themselves are opened by playback and capture.
#[derive(Debug, Default)]
pub struct SystemAudioDevice;

impl AudioDevice for SystemAudioDevice {
    fn activate(&self, mode: AudioMode) -> Result<()> {
        let host = cpal::default_host();
        let device = match mode {
            AudioMode::Playing => host.default_output_device(),
            AudioMode::Recording => host.default_input_device(),
            AudioMode::Idle => return Ok(()),
        }
        .ok_or_else(|| Error::AudioUnavailable(format!("no device available for {mode}")))?;

        tracing::debug!(
            %mode,
            device = device.name().unwrap_or_default(),
            "audio device activated"
        );
        Ok(())
    }

    fn deactivate(&self, mode: AudioMode) {
        tracing::debug!(%mode, "audio device deactivated");
    }
}

//! Wiring of the speech I/O components

use std::sync::Arc;
use std::time::Duration;

use crate::Result;
use crate::arbiter::{AudioDevice, AudioResourceArbiter};
use crate::config::Config;
use crate::stt::{RecognitionEngine, SpeechListener, WhisperRecognizer, listen_with_retry};
use crate::tts::{HttpSynthesisClient, Priority, SpeechSynthesizer, SynthesisClient};
use crate::voice::{CpalPlayback, PlaybackEngine, SystemAudioDevice};

/// Synthesizer and listener sharing one audio arbiter
#[derive(Clone)]
pub struct SpeechIo {
    arbiter: Arc<AudioResourceArbiter>,
    synthesizer: SpeechSynthesizer,
    listener: SpeechListener,
    config: Config,
}

impl SpeechIo {
    /// Build the speech stack on the system audio devices
    ///
    /// # Errors
    ///
    /// Returns error if a backend is misconfigured or no output device exists
    pub fn from_config(config: Config) -> Result<Self> {
        let client = HttpSynthesisClient::new(&config.tts)?;
        let recognizer = WhisperRecognizer::new(&config.stt)?;
        let playback = CpalPlayback::new()?;

        Ok(Self::new(
            config,
            Arc::new(SystemAudioDevice),
            Arc::new(client),
            Arc::new(playback),
            Arc::new(recognizer),
        ))
    }

    /// Build the speech stack from explicit collaborators
    #[must_use]
    pub fn new(
        config: Config,
        device: Arc<dyn AudioDevice>,
        client: Arc<dyn SynthesisClient>,
        playback: Arc<dyn PlaybackEngine>,
        engine: Arc<dyn RecognitionEngine>,
    ) -> Self {
        let arbiter = Arc::new(AudioResourceArbiter::new(device));
        let synthesizer =
            SpeechSynthesizer::new(client, playback, Arc::clone(&arbiter), &config.tts);
        let listener = SpeechListener::new(Arc::clone(&arbiter), engine);

        Self {
            arbiter,
            synthesizer,
            listener,
            config,
        }
    }

    /// Speak `text` with the configured default voice
    ///
    /// # Errors
    ///
    /// See [`SpeechSynthesizer::speak`]
    pub async fn say(&self, text: &str, priority: Priority) -> Result<()> {
        self.synthesizer
            .speak(text, &self.config.tts.default_voice, priority)
            .await
    }

    /// Listen with the configured timeout and retry count
    ///
    /// # Errors
    ///
    /// See [`listen_with_retry`]
    pub async fn hear<P>(&self, on_partial: P) -> Result<Option<String>>
    where
        P: Fn(String) + Clone + Send + Sync + 'static,
    {
        listen_with_retry(
            &self.listener,
            on_partial,
            Duration::from_secs(self.config.listener.timeout_secs),
            self.config.listener.max_retries,
        )
        .await
    }

    /// The shared audio arbiter
    #[must_use]
    pub const fn arbiter(&self) -> &Arc<AudioResourceArbiter> {
        &self.arbiter
    }

    /// The speech synthesizer
    #[must_use]
    pub const fn synthesizer(&self) -> &SpeechSynthesizer {
        &self.synthesizer
    }

    /// The speech listener
    #[must_use]
    pub const fn listener(&self) -> &SpeechListener {
        &self.listener
    }

    /// Effective configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }
}

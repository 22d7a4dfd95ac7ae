//! Whisper-backed recognition of microphone utterances

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::engine::{RecognitionEngine, RecognitionEvent};
use crate::config::SttConfig;
use crate::voice::{SAMPLE_RATE, record_utterance, samples_to_wav};
use crate::{Error, Result};

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Records one utterance and transcribes it with a Whisper endpoint
///
/// Produces a single final transcript per session and no partials.
#[derive(Clone)]
pub struct WhisperRecognizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    language: Option<String>,
}

impl WhisperRecognizer {
    /// Create a recognizer from STT configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(config: &SttConfig) -> Result<Self> {
        let api_key = config.api_key.clone().unwrap_or_default();
        if api_key.is_empty() {
            return Err(Error::Config(
                "OPENAI_API_KEY required for speech recognition".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("spectra-speech/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the request fails and
    /// [`Error::Recognition`] if the service rejects the audio
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let file = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Recognition(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "transcription request failed");
                Error::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "transcription API error");
            return Err(Error::Recognition(format!(
                "transcription API error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::Recognition(format!("invalid transcription response: {e}")))?;

        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

impl RecognitionEngine for WhisperRecognizer {
    fn start(&self, stop: CancellationToken) -> Result<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (utterance_tx, utterance_rx) = oneshot::channel();

        // The cpal stream is not `Send`, so it lives and dies on this thread
        let capture_stop = stop.clone();
        let capture_events = events_tx.clone();
        std::thread::Builder::new()
            .name("spectra-capture".to_string())
            .spawn(move || match record_utterance(&capture_stop) {
                Ok(Some(samples)) => {
                    let _ = utterance_tx.send(samples);
                }
                Ok(None) => {}
                Err(Error::AudioUnavailable(message)) => {
                    let _ = capture_events.send(RecognitionEvent::Unavailable(message));
                }
                Err(e) => {
                    let _ = capture_events.send(RecognitionEvent::Error(e.to_string()));
                }
            })
            .map_err(|e| Error::Recognition(format!("failed to spawn capture thread: {e}")))?;

        let recognizer = self.clone();
        tokio::spawn(async move {
            let samples = tokio::select! {
                () = stop.cancelled() => return,
                samples = utterance_rx => match samples {
                    Ok(samples) => samples,
                    // Capture failed or was stopped, and has said so if needed
                    Err(_) => return,
                },
            };

            let event = tokio::select! {
                () = stop.cancelled() => return,
                result = recognizer.transcribe_samples(&samples) => match result {
                    Ok(text) if text.is_empty() => {
                        RecognitionEvent::Error("no speech recognized".to_string())
                    }
                    Ok(text) => RecognitionEvent::Transcript { text, is_final: true },
                    Err(e) => RecognitionEvent::Error(e.to_string()),
                },
            };
            let _ = events_tx.send(event);
        });

        Ok(events_rx)
    }
}

impl WhisperRecognizer {
    async fn transcribe_samples(&self, samples: &[f32]) -> Result<String> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        self.transcribe(wav).await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn config(server: &MockServer) -> SttConfig {
        SttConfig {
            endpoint: format!("{}/v1/audio/transcriptions", server.uri()),
            api_key: Some("sk-test".to_string()),
            ..SttConfig::default()
        }
    }

    #[tokio::test]
    async fn test_start_returns_before_capture_finishes() {
        let config = SttConfig {
            api_key: Some("sk-test".to_string()),
            ..SttConfig::default()
        };
        let recognizer = WhisperRecognizer::new(&config).unwrap();
        let stop = CancellationToken::new();

        let mut events = recognizer.start(stop.clone()).unwrap();
        stop.cancel();

        // Either the device was missing or capture stopped; never a transcript
        let last = tokio::time::timeout(std::time::Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert!(!matches!(last, Some(RecognitionEvent::Transcript { .. })));
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let err = WhisperRecognizer::new(&SttConfig::default()).err();
        assert!(matches!(err, Some(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_transcribe_parses_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("Authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "text": " hello there " })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let recognizer = WhisperRecognizer::new(&config(&server)).unwrap();
        let wav = samples_to_wav(&[0.0; 1600], SAMPLE_RATE).unwrap();

        assert_eq!(recognizer.transcribe(wav).await.unwrap(), "hello there");
    }

    #[tokio::test]
    async fn test_transcribe_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let recognizer = WhisperRecognizer::new(&config(&server)).unwrap();
        let err = recognizer.transcribe(vec![0; 44]).await.unwrap_err();

        assert!(matches!(err, Error::Recognition(msg) if msg.contains("bad audio")));
    }
}

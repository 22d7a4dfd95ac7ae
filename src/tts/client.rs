//! Remote text-to-speech synthesis

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::ssml::build_ssml;
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Network synthesis backend
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Synthesize `text` with `voice_id`, returning encoded audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] on transport failure, timeout, non-2xx
    /// status or an empty body
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes>;
}

/// Synthesizes speech by posting SSML to an HTTP endpoint
pub struct HttpSynthesisClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    api_key_header: String,
    output_format: Option<String>,
    language: String,
}

impl HttpSynthesisClient {
    /// Create a client from TTS configuration
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is missing or the HTTP client cannot be built
    pub fn new(config: &TtsConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(Error::Config("TTS endpoint required".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("spectra-speech/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            api_key_header: config.api_key_header.clone(),
            output_format: config.output_format.clone(),
            language: config.language.clone(),
        })
    }
}

#[async_trait]
impl SynthesisClient for HttpSynthesisClient {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Bytes> {
        let body = build_ssml(text, voice_id, &self.language);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/ssml+xml")
            .body(body);

        if let Some(key) = &self.api_key {
            request = request.header(self.api_key_header.as_str(), key);
        }
        if let Some(format) = &self.output_format {
            request = request.header("X-Microsoft-OutputFormat", format);
        }

        tracing::debug!(voice = voice_id, chars = text.len(), "requesting synthesis");

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "synthesis request failed");
            Error::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "TTS service error");
            return Err(Error::Network(format!("TTS service error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Network("TTS service returned an empty body".to_string()));
        }

        tracing::debug!(voice = voice_id, bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}

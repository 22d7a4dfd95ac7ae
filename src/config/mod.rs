//! Configuration management for the speech subsystem

pub mod file;

use crate::tts::DEFAULT_MAX_ENTRIES;
use file::SpeechConfigFile;

/// Default synthesis request timeout
pub const DEFAULT_TTS_TIMEOUT_SECS: u64 = 15;

/// Default seconds to wait for a final transcript
pub const DEFAULT_LISTEN_TIMEOUT_SECS: u64 = 8;

/// Default restarts after a listening timeout
pub const DEFAULT_LISTEN_RETRIES: u32 = 2;

/// Speech subsystem configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Text-to-speech configuration
    pub tts: TtsConfig,

    /// Speech recognition configuration
    pub stt: SttConfig,

    /// Listening session defaults
    pub listener: ListenerConfig,
}

/// Text-to-speech configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Synthesis endpoint receiving SSML documents
    pub endpoint: String,

    /// Subscription key, sent in `api_key_header`
    pub api_key: Option<String>,

    /// Header name carrying the subscription key
    pub api_key_header: String,

    /// Requested audio format (sent as `X-Microsoft-OutputFormat`)
    pub output_format: Option<String>,

    /// SSML language tag
    pub language: String,

    /// Voice used when a caller does not pick one
    pub default_voice: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Maximum cached utterances
    pub cache_entries: usize,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://eastus.tts.speech.microsoft.com/cognitiveservices/v1".to_string(),
            api_key: None,
            api_key_header: "Ocp-Apim-Subscription-Key".to_string(),
            output_format: Some("audio-24khz-48kbitrate-mono-mp3".to_string()),
            language: "en-US".to_string(),
            default_voice: "en-US-JennyNeural".to_string(),
            timeout_secs: DEFAULT_TTS_TIMEOUT_SECS,
            cache_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

/// Speech recognition configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// OpenAI-compatible transcription endpoint
    pub endpoint: String,

    /// API key for the transcription endpoint
    pub api_key: Option<String>,

    /// Transcription model
    pub model: String,

    /// Language hint (ISO 639-1, e.g. "en")
    pub language: Option<String>,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            language: None,
        }
    }
}

/// Listening session defaults
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Seconds to wait for a final transcript before restarting
    pub timeout_secs: u64,

    /// Restarts after the first attempt times out
    pub max_retries: u32,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LISTEN_TIMEOUT_SECS,
            max_retries: DEFAULT_LISTEN_RETRIES,
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |name| std::env::var(name).ok())
    }

    /// Merge a parsed config file with variables from `env`
    pub fn from_sources(fc: SpeechConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let defaults_tts = TtsConfig::default();
        let tts = TtsConfig {
            endpoint: env("SPECTRA_TTS_ENDPOINT")
                .or(fc.tts.endpoint)
                .unwrap_or(defaults_tts.endpoint),
            api_key: env("SPECTRA_TTS_KEY").or(fc.tts.api_key),
            api_key_header: fc
                .tts
                .api_key_header
                .unwrap_or(defaults_tts.api_key_header),
            output_format: fc.tts.output_format.or(defaults_tts.output_format),
            language: env("SPECTRA_TTS_LANGUAGE")
                .or(fc.tts.language)
                .unwrap_or(defaults_tts.language),
            default_voice: env("SPECTRA_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or(defaults_tts.default_voice),
            timeout_secs: env("SPECTRA_TTS_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.tts.timeout_secs)
                .unwrap_or(DEFAULT_TTS_TIMEOUT_SECS),
            cache_entries: env("SPECTRA_TTS_CACHE_ENTRIES")
                .and_then(|s| s.parse().ok())
                .or(fc.tts.cache_entries)
                .unwrap_or(DEFAULT_MAX_ENTRIES),
        };

        let defaults_stt = SttConfig::default();
        let stt = SttConfig {
            endpoint: env("SPECTRA_STT_ENDPOINT")
                .or(fc.stt.endpoint)
                .unwrap_or(defaults_stt.endpoint),
            api_key: env("OPENAI_API_KEY").or(fc.stt.api_key),
            model: env("SPECTRA_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or(defaults_stt.model),
            language: fc.stt.language,
        };

        let listener = ListenerConfig {
            timeout_secs: env("SPECTRA_LISTEN_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .or(fc.listener.timeout_secs)
                .unwrap_or(DEFAULT_LISTEN_TIMEOUT_SECS),
            max_retries: env("SPECTRA_LISTEN_RETRIES")
                .and_then(|s| s.parse().ok())
                .or(fc.listener.max_retries)
                .unwrap_or(DEFAULT_LISTEN_RETRIES),
        };

        if tts.api_key.is_none() {
            tracing::warn!("SPECTRA_TTS_KEY not set, synthesis requests may be rejected");
        }

        Self { tts, stt, listener }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::config::file::{ListenerFileConfig, TtsFileConfig};

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(SpeechConfigFile::default(), env_from(&[]));

        assert_eq!(config.tts.timeout_secs, 15);
        assert_eq!(config.tts.cache_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(config.listener.max_retries, DEFAULT_LISTEN_RETRIES);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc = SpeechConfigFile {
            tts: TtsFileConfig {
                voice: Some("file-voice".to_string()),
                timeout_secs: Some(30),
                ..TtsFileConfig::default()
            },
            listener: ListenerFileConfig {
                timeout_secs: Some(4),
                max_retries: None,
            },
            ..SpeechConfigFile::default()
        };
        let config = Config::from_sources(
            fc,
            env_from(&[("SPECTRA_TTS_VOICE", "env-voice"), ("SPECTRA_LISTEN_RETRIES", "7")]),
        );

        assert_eq!(config.tts.default_voice, "env-voice");
        assert_eq!(config.tts.timeout_secs, 30);
        assert_eq!(config.listener.timeout_secs, 4);
        assert_eq!(config.listener.max_retries, 7);
    }

    #[test]
    fn test_unparsable_env_falls_back() {
        let config = Config::from_sources(
            SpeechConfigFile::default(),
            env_from(&[("SPECTRA_TTS_CACHE_ENTRIES", "lots")]),
        );
        assert_eq!(config.tts.cache_entries, DEFAULT_MAX_ENTRIES);
    }
}

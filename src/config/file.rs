//! TOML configuration file loading
//!
//! Supports `~/.config/spectra/speech.toml` as a persistent config source.
//! All fields are optional; the file overlays the defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SpeechConfigFile {
    /// Text-to-speech configuration
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Speech recognition configuration
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Listening session defaults
    #[serde(default)]
    pub listener: ListenerFileConfig,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Synthesis endpoint URL
    pub endpoint: Option<String>,

    /// Subscription key for the synthesis endpoint
    pub api_key: Option<String>,

    /// Header carrying the subscription key
    pub api_key_header: Option<String>,

    /// Requested audio output format
    pub output_format: Option<String>,

    /// SSML language tag (e.g. "en-US")
    pub language: Option<String>,

    /// Voice used when a caller does not pick one
    pub voice: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// Maximum cached utterances
    pub cache_entries: Option<usize>,
}

/// Speech recognition configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Transcription endpoint URL
    pub endpoint: Option<String>,

    /// API key for the transcription endpoint
    pub api_key: Option<String>,

    /// Transcription model (e.g. "whisper-1")
    pub model: Option<String>,

    /// Language hint (ISO 639-1)
    pub language: Option<String>,
}

/// Listening session defaults
#[derive(Debug, Default, Deserialize)]
pub struct ListenerFileConfig {
    /// Seconds to wait for a final transcript before restarting
    pub timeout_secs: Option<u64>,

    /// Restarts after the first attempt times out
    pub max_retries: Option<u32>,
}

/// Load the TOML config file from `SPECTRA_CONFIG` or the standard path
///
/// Returns `SpeechConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> SpeechConfigFile {
    let path = std::env::var("SPECTRA_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    path.map_or_else(SpeechConfigFile::default, |p| load_from_path(&p))
}

/// Load a config file from an explicit path
///
/// Missing or unparsable files yield the defaults.
pub fn load_from_path(path: &Path) -> SpeechConfigFile {
    if !path.exists() {
        return SpeechConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SpeechConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SpeechConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/spectra/speech.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("app", "spectra", "spectra")
        .map(|d| d.config_dir().join("speech.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let fc: SpeechConfigFile = toml::from_str(
            r#"
            [tts]
            voice = "en-GB-SoniaNeural"
            cache_entries = 16

            [listener]
            max_retries = 5
            "#,
        )
        .unwrap();

        assert_eq!(fc.tts.voice.as_deref(), Some("en-GB-SoniaNeural"));
        assert_eq!(fc.tts.cache_entries, Some(16));
        assert!(fc.tts.endpoint.is_none());
        assert_eq!(fc.listener.max_retries, Some(5));
        assert!(fc.stt.model.is_none());
    }

    #[test]
    fn test_missing_file_is_default() {
        let fc = load_from_path(Path::new("/nonexistent/spectra/speech.toml"));
        assert!(fc.tts.endpoint.is_none());
    }
}

//! TOML configuration file loading
//!
//! Supports `~/.config/zoul/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct ZoulConfigFile {
    /// Conversation settings supplied by the dashboard
    #[serde(default)]
    pub settings: SettingsFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Completion service configuration
    #[serde(default)]
    pub completion: CompletionFileConfig,

    /// Status API configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Conversation toggles
#[derive(Debug, Default, Deserialize)]
pub struct SettingsFileConfig {
    /// Gate activation behind the trigger phrase
    pub wake_word: Option<bool>,

    /// Restart capture automatically after each reply
    pub continuous_listening: Option<bool>,

    /// Microphone sensitivity (0-100)
    pub voice_sensitivity: Option<u8>,

    /// Active persona ids (e.g. `["zoul", "lumina"]`)
    pub active_personas: Option<Vec<String>>,

    /// API key for the completion/speech services
    pub api_key: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Trigger phrase (e.g. "zoul")
    pub wake_phrase: Option<String>,

    /// Delay before the wake listener restarts, in milliseconds
    pub wake_debounce_ms: Option<u64>,

    /// Phrase spoken after a bare trigger, before capture starts
    pub acknowledgement: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "onyx")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f64>,
}

/// Completion service configuration
#[derive(Debug, Default, Deserialize)]
pub struct CompletionFileConfig {
    /// Model identifier (e.g. "gpt-4o-mini")
    pub model: Option<String>,

    /// API base URL
    pub base_url: Option<String>,
}

/// Status API configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Status API port
    pub port: Option<u16>,

    /// Disable the status API entirely
    pub enabled: Option<bool>,
}

/// Load the TOML config file from the standard path
///
/// Returns `ZoulConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> ZoulConfigFile {
    config_file_path().map_or_else(ZoulConfigFile::default, |path| load_config_from(&path))
}

/// Load a config file from an explicit path, falling back to defaults
pub fn load_config_from(path: &Path) -> ZoulConfigFile {
    if !path.exists() {
        return ZoulConfigFile::default();
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
                ZoulConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            ZoulConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/zoul/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("zoul").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let fc = load_config_from(&dir.path().join("absent.toml"));
        assert!(fc.settings.wake_word.is_none());
        assert!(fc.voice.wake_phrase.is_none());
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[settings]
wake_word = false
voice_sensitivity = 70
active_personas = ["zoul", "oracle"]

[voice]
wake_phrase = "hey zoul"
"#,
        )
        .unwrap();

        let fc = load_config_from(&path);
        assert_eq!(fc.settings.wake_word, Some(false));
        assert_eq!(fc.settings.voice_sensitivity, Some(70));
        assert_eq!(
            fc.settings.active_personas.as_deref(),
            Some(&["zoul".to_string(), "oracle".to_string()][..])
        );
        assert_eq!(fc.voice.wake_phrase.as_deref(), Some("hey zoul"));
        assert!(fc.completion.model.is_none());
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[settings\nwake_word = ").unwrap();

        let fc = load_config_from(&path);
        assert!(fc.settings.wake_word.is_none());
    }
}

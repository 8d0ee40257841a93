//! Configuration management for the Zoul voice pipeline
//!
//! Two layers:
//! - [`Settings`]: the dashboard's conversation settings. The core treats these as a
//!   read-only snapshot per turn; the dashboard publishes updates over a `watch` channel.
//! - [`Config`]: process configuration (models, endpoints, trigger phrase, API port).

pub mod file;

use std::time::Duration;

use secrecy::SecretString;

use crate::persona::DEFAULT_PERSONA_ID;

/// Default OpenAI-compatible API base URL
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default trigger phrase
pub const DEFAULT_WAKE_PHRASE: &str = "zoul";

/// Conversation settings supplied by the dashboard
#[derive(Debug, Clone)]
pub struct Settings {
    /// Gate activation behind the trigger phrase
    pub wake_word_enabled: bool,

    /// Restart capture automatically after each spoken reply
    pub continuous_capture_enabled: bool,

    /// Opaque credential for the completion/speech services
    pub credential: Option<SecretString>,

    /// Microphone sensitivity, 0 (least) to 100 (most)
    pub voice_sensitivity: u8,

    /// Ids of the currently active assistant personas
    pub active_personas: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wake_word_enabled: true,
            continuous_capture_enabled: false,
            credential: None,
            voice_sensitivity: 50,
            active_personas: vec![DEFAULT_PERSONA_ID.to_string()],
        }
    }
}

impl Settings {
    /// Whether a non-empty credential is configured
    #[must_use]
    pub fn has_credential(&self) -> bool {
        use secrecy::ExposeSecret;
        self.credential
            .as_ref()
            .is_some_and(|c| !c.expose_secret().trim().is_empty())
    }

    /// The credential, if present and non-empty
    #[must_use]
    pub fn credential(&self) -> Option<&SecretString> {
        if self.has_credential() {
            self.credential.as_ref()
        } else {
            None
        }
    }

    /// Set sensitivity, clamped to 0-100
    pub fn set_voice_sensitivity(&mut self, value: u8) {
        self.voice_sensitivity = value.min(100);
    }
}

/// Process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Initial dashboard settings
    pub settings: Settings,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Completion service configuration
    pub completion: CompletionConfig,

    /// Status API configuration
    pub api_server: ApiServerConfig,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable microphone and speaker use
    pub enabled: bool,

    /// Trigger phrase for the wake-word gate
    pub wake_phrase: String,

    /// Delay before the wake listener restarts after an unproductive session
    pub wake_debounce: Duration,

    /// Phrase spoken after a bare trigger, before capture starts
    pub acknowledgement: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f64,

    /// Base URL for the speech endpoints
    pub base_url: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_phrase: DEFAULT_WAKE_PHRASE.to_string(),
            wake_debounce: Duration::from_millis(400),
            acknowledgement: None,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 0.95,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Completion service configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Model identifier
    pub model: String,

    /// API base URL
    pub base_url: String,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Status API configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Serve the status API
    pub enabled: bool,

    /// Port to listen on (bound to localhost)
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 18_790,
        }
    }
}

impl Config {
    /// Load configuration from the environment and config file
    #[must_use]
    pub fn load() -> Self {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    #[must_use]
    pub fn load_with_options(disable_voice: bool) -> Self {
        let fc = file::load_config_file();
        let config = Self::from_sources(fc, |key| std::env::var(key).ok(), disable_voice);

        if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
        }

        config
    }

    /// Merge sources with priority env > toml > default
    pub fn from_sources(
        fc: file::ZoulConfigFile,
        env: impl Fn(&str) -> Option<String>,
        disable_voice: bool,
    ) -> Self {
        let flag = |key: &str| {
            env(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let defaults = Settings::default();
        let credential = env("ZOUL_API_KEY")
            .or_else(|| env("OPENAI_API_KEY"))
            .or(fc.settings.api_key)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let mut settings = Settings {
            wake_word_enabled: flag("ZOUL_WAKE_WORD")
                .or(fc.settings.wake_word)
                .unwrap_or(defaults.wake_word_enabled),
            continuous_capture_enabled: flag("ZOUL_CONTINUOUS")
                .or(fc.settings.continuous_listening)
                .unwrap_or(defaults.continuous_capture_enabled),
            credential,
            voice_sensitivity: defaults.voice_sensitivity,
            active_personas: fc
                .settings
                .active_personas
                .unwrap_or(defaults.active_personas),
        };
        settings.set_voice_sensitivity(
            env("ZOUL_SENSITIVITY")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .map(|v| u8::try_from(v.min(100)).unwrap_or(100))
                .or(fc.settings.voice_sensitivity)
                .unwrap_or(defaults.voice_sensitivity),
        );

        let openai_base = env("ZOUL_OPENAI_BASE_URL");

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            enabled: !disable_voice,
            wake_phrase: env("ZOUL_WAKE_PHRASE")
                .or(fc.voice.wake_phrase)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or(voice_defaults.wake_phrase),
            wake_debounce: fc
                .voice
                .wake_debounce_ms
                .map_or(voice_defaults.wake_debounce, Duration::from_millis),
            acknowledgement: fc.voice.acknowledgement.filter(|a| !a.trim().is_empty()),
            stt_model: fc.voice.stt_model.unwrap_or(voice_defaults.stt_model),
            tts_model: fc.voice.tts_model.unwrap_or(voice_defaults.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(voice_defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
            base_url: openai_base.clone().unwrap_or(voice_defaults.base_url),
        };

        let completion_defaults = CompletionConfig::default();
        let completion = CompletionConfig {
            model: env("ZOUL_COMPLETION_MODEL")
                .or(fc.completion.model)
                .unwrap_or(completion_defaults.model),
            base_url: openai_base
                .or(fc.completion.base_url)
                .unwrap_or(completion_defaults.base_url),
        };

        let api_defaults = ApiServerConfig::default();
        let api_server = ApiServerConfig {
            enabled: fc.server.enabled.unwrap_or(api_defaults.enabled),
            port: env("ZOUL_API_PORT")
                .and_then(|s| s.parse().ok())
                .or(fc.server.port)
                .unwrap_or(api_defaults.port),
        };

        Self {
            settings,
            voice,
            completion,
            api_server,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::file::ZoulConfigFile;
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(ZoulConfigFile::default(), env_from(&[]), false);

        assert!(config.settings.wake_word_enabled);
        assert!(!config.settings.continuous_capture_enabled);
        assert!(!config.settings.has_credential());
        assert_eq!(config.settings.voice_sensitivity, 50);
        assert_eq!(config.settings.active_personas, vec!["zoul".to_string()]);
        assert_eq!(config.voice.wake_phrase, "zoul");
        assert!(config.voice.enabled);
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.api_server.port, 18_790);
    }

    #[test]
    fn test_env_overrides_file() {
        let mut fc = ZoulConfigFile::default();
        fc.settings.wake_word = Some(true);
        fc.settings.api_key = Some("file-key".to_string());
        fc.voice.wake_phrase = Some("hey zoul".to_string());

        let config = Config::from_sources(
            fc,
            env_from(&[
                ("ZOUL_WAKE_WORD", "false"),
                ("ZOUL_API_KEY", "env-key"),
                ("ZOUL_SENSITIVITY", "250"),
                ("ZOUL_API_PORT", "9000"),
            ]),
            true,
        );

        assert!(!config.settings.wake_word_enabled);
        assert!(config.settings.has_credential());
        assert_eq!(config.settings.voice_sensitivity, 100);
        assert_eq!(config.voice.wake_phrase, "hey zoul");
        assert!(!config.voice.enabled);
        assert_eq!(config.api_server.port, 9000);
    }

    #[test]
    fn test_blank_credential_is_absent() {
        let config = Config::from_sources(
            ZoulConfigFile::default(),
            env_from(&[("OPENAI_API_KEY", "   ")]),
            false,
        );
        assert!(config.settings.credential().is_none());
    }

    #[test]
    fn test_base_url_override_applies_to_both_services() {
        let config = Config::from_sources(
            ZoulConfigFile::default(),
            env_from(&[("ZOUL_OPENAI_BASE_URL", "http://localhost:8080/v1")]),
            false,
        );
        assert_eq!(config.voice.base_url, "http://localhost:8080/v1");
        assert_eq!(config.completion.base_url, "http://localhost:8080/v1");
    }
}

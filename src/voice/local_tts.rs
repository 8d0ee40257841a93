//! Local system voice
//!
//! Speaks through whichever command-line synthesizer the host provides. Speech goes
//! straight to the system audio path, bypassing the playback engine.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OnceCell};

use crate::{Error, Result};

/// Speaking rate relative to the engine default
pub const RATE: f32 = 0.95;

/// Pitch relative to the engine default
pub const PITCH: f32 = 0.8;

/// How often a running synthesizer is checked for exit
const POLL_INTERVAL: Duration = Duration::from_millis(50);

static PREFERRED_VOICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)en-US|Google US|Microsoft|Alex|Samantha").expect("valid regex")
});

/// Local synthesis capability
#[async_trait]
pub trait LocalVoice: Send + Sync {
    /// Speak `text`; resolves when speech finishes or is cancelled
    ///
    /// # Errors
    ///
    /// `Error::LocalVoice` when no synthesizer is available or it fails
    async fn speak(&self, text: &str) -> Result<()>;

    /// Cancel speech in progress; idempotent
    async fn cancel(&self);
}

/// Supported synthesizer programs, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    EspeakNg,
    Espeak,
    Say,
    SpdSay,
}

impl Engine {
    const ALL: [Self; 4] = [Self::EspeakNg, Self::Espeak, Self::Say, Self::SpdSay];

    #[must_use]
    pub const fn binary(self) -> &'static str {
        match self {
            Self::EspeakNg => "espeak-ng",
            Self::Espeak => "espeak",
            Self::Say => "say",
            Self::SpdSay => "spd-say",
        }
    }

    /// First engine found on `PATH`
    #[must_use]
    pub fn discover() -> Option<(Self, PathBuf)> {
        Self::ALL
            .into_iter()
            .find_map(|engine| which::which(engine.binary()).ok().map(|p| (engine, p)))
    }

    /// Arguments that speak `text` with the rate and pitch constants applied
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub fn speak_args(self, text: &str, voice: Option<&str>) -> Vec<String> {
        // Keep text from being parsed as an option
        let text = if text.starts_with('-') {
            format!(" {text}")
        } else {
            text.to_string()
        };

        let mut args = Vec::new();
        match self {
            Self::EspeakNg | Self::Espeak => {
                if let Some(voice) = voice {
                    args.extend(["-v".to_string(), voice.to_string()]);
                }
                args.extend([
                    "-s".to_string(),
                    ((175.0 * RATE).round() as u32).to_string(),
                    "-p".to_string(),
                    ((50.0 * PITCH).round() as u32).to_string(),
                ]);
            }
            Self::Say => {
                if let Some(voice) = voice {
                    args.extend(["-v".to_string(), voice.to_string()]);
                }
                args.extend(["-r".to_string(), ((175.0 * RATE).round() as u32).to_string()]);
            }
            Self::SpdSay => {
                args.push("-w".to_string());
                if let Some(voice) = voice {
                    args.extend(["-y".to_string(), voice.to_string()]);
                }
                args.extend([
                    "-r".to_string(),
                    (((RATE - 1.0) * 100.0).round() as i32).to_string(),
                    "-p".to_string(),
                    (((PITCH - 1.0) * 100.0).round() as i32).to_string(),
                ]);
            }
        }
        args.push(text);
        args
    }

    const fn list_args(self) -> &'static [&'static str] {
        match self {
            Self::EspeakNg | Self::Espeak => &["--voices"],
            Self::Say => &["-v", "?"],
            Self::SpdSay => &["-L"],
        }
    }

    /// Parse the engine's voice listing
    #[must_use]
    pub fn parse_voices(self, listing: &str) -> Vec<VoiceInfo> {
        listing
            .lines()
            .filter_map(|line| {
                let line = line.trim_end();
                match self {
                    // " 5  en-us   --/M   English_(America)   gmw/en-US"
                    Self::EspeakNg | Self::Espeak => {
                        let cols: Vec<&str> = line.split_whitespace().collect();
                        if cols.len() < 4 || cols[0] == "Pty" {
                            return None;
                        }
                        Some(VoiceInfo {
                            id: cols[1].to_string(),
                            description: cols[1..].join(" "),
                        })
                    }
                    // "Alex                en_US    # Most people recognize me by my voice."
                    Self::Say => {
                        let head = line.split('#').next()?.trim();
                        let (name, locale) = head.rsplit_once(char::is_whitespace)?;
                        let name = name.trim();
                        (!name.is_empty()).then(|| VoiceInfo {
                            id: name.to_string(),
                            description: format!("{name} {}", locale.replace('_', "-")),
                        })
                    }
                    // "NAME  LANGUAGE  VARIANT"
                    Self::SpdSay => {
                        let cols: Vec<&str> = line.split_whitespace().collect();
                        if cols.len() < 2 || cols[0] == "NAME" {
                            return None;
                        }
                        Some(VoiceInfo {
                            id: cols[0].to_string(),
                            description: cols.join(" "),
                        })
                    }
                }
            })
            .collect()
    }
}

/// A voice offered by the local engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceInfo {
    /// Identifier passed back to the engine
    pub id: String,
    /// Human-readable line the preference pattern is matched against
    pub description: String,
}

/// First voice matching the preferred-voice pattern, if any
#[must_use]
pub fn select_voice(voices: &[VoiceInfo]) -> Option<&VoiceInfo> {
    voices
        .iter()
        .find(|v| PREFERRED_VOICE.is_match(&v.description) || PREFERRED_VOICE.is_match(&v.id))
}

/// Local voice backed by a system synthesizer program
pub struct SystemVoice {
    engine: Option<(Engine, PathBuf)>,
    voice: OnceCell<Option<String>>,
    child: Mutex<Option<Child>>,
}

impl Default for SystemVoice {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemVoice {
    /// Discover the host synthesizer
    #[must_use]
    pub fn new() -> Self {
        let engine = Engine::discover();
        match &engine {
            Some((engine, path)) => {
                tracing::debug!(engine = engine.binary(), path = %path.display(), "local voice available");
            }
            None => tracing::debug!("no local speech synthesizer found"),
        }

        Self {
            engine,
            voice: OnceCell::new(),
            child: Mutex::new(None),
        }
    }

    /// Whether a synthesizer was found
    #[must_use]
    pub const fn is_available(&self) -> bool {
        self.engine.is_some()
    }

    /// Voices offered by the engine
    ///
    /// # Errors
    ///
    /// `Error::LocalVoice` without an engine, `Error::Io` if listing fails
    pub async fn voices(&self) -> Result<Vec<VoiceInfo>> {
        let (engine, path) = self
            .engine
            .as_ref()
            .ok_or_else(|| Error::LocalVoice("no system speech synthesizer found".to_string()))?;

        let output = Command::new(path)
            .args(engine.list_args())
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;

        Ok(engine.parse_voices(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn preferred_voice(&self) -> Option<String> {
        self.voice
            .get_or_init(|| async {
                match self.voices().await {
                    Ok(voices) => {
                        let chosen = select_voice(&voices).map(|v| v.id.clone());
                        tracing::debug!(voice = ?chosen, "local voice selected");
                        chosen
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "could not list local voices");
                        None
                    }
                }
            })
            .await
            .clone()
    }
}

#[async_trait]
impl LocalVoice for SystemVoice {
    async fn speak(&self, text: &str) -> Result<()> {
        self.cancel().await;

        let Some((engine, path)) = self.engine.as_ref() else {
            return Err(Error::LocalVoice(
                "no system speech synthesizer found".to_string(),
            ));
        };
        let voice = self.preferred_voice().await;

        let child = Command::new(path)
            .args(engine.speak_args(text, voice.as_deref()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::LocalVoice(format!("failed to start {}: {e}", engine.binary())))?;

        *self.child.lock().await = Some(child);
        tracing::debug!(engine = engine.binary(), chars = text.len(), "local voice speaking");

        loop {
            {
                let mut slot = self.child.lock().await;
                let Some(child) = slot.as_mut() else {
                    // Cancelled
                    return Ok(());
                };
                if let Some(status) = child.try_wait()? {
                    slot.take();
                    if status.success() {
                        return Ok(());
                    }
                    return Err(Error::LocalVoice(format!(
                        "{} exited with {status}",
                        engine.binary()
                    )));
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn cancel(&self) {
        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(error = %e, "local voice already exited");
            }
            tracing::debug!("local voice cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_espeak_voices() {
        let listing = "Pty Language       Age/Gender VoiceName          File                 Other Languages\n \
             5  af              --/M      Afrikaans          gmw/af\n \
             2  en-gb           --/M      English_(Great_Britain) gmw/en\n \
             2  en-us           --/M      English_(America)  gmw/en-US\n";
        let voices = Engine::EspeakNg.parse_voices(listing);
        assert_eq!(voices.len(), 3);
        assert_eq!(select_voice(&voices).map(|v| v.id.as_str()), Some("en-us"));
    }

    #[test]
    fn test_parse_say_voices() {
        let listing = "Albert              en_US    # Hello! My name is Albert.\n\
             Good News           en_US    # Hello! My name is Good News.\n\
             Samantha            en_US    # Hello! My name is Samantha.\n";
        let voices = Engine::Say.parse_voices(listing);
        assert_eq!(voices[1].id, "Good News");
        // en_US is normalized, so the first en-US voice wins
        assert_eq!(select_voice(&voices).map(|v| v.id.as_str()), Some("Albert"));
    }

    #[test]
    fn test_no_preferred_voice() {
        let voices = vec![VoiceInfo {
            id: "fr".to_string(),
            description: "fr French".to_string(),
        }];
        assert!(select_voice(&voices).is_none());
    }

    #[test]
    fn test_speak_args_apply_rate_and_pitch() {
        let args = Engine::EspeakNg.speak_args("hello", Some("en-us"));
        assert_eq!(args, vec!["-v", "en-us", "-s", "166", "-p", "40", "hello"]);

        let args = Engine::SpdSay.speak_args("hello", None);
        assert_eq!(args, vec!["-w", "-r", "-5", "-p", "-20", "hello"]);

        let args = Engine::Say.speak_args("-dash", None);
        assert_eq!(args.last().map(String::as_str), Some(" -dash"));
    }

    #[tokio::test]
    async fn test_cancel_without_speech_is_noop() {
        let voice = SystemVoice {
            engine: None,
            voice: OnceCell::new(),
            child: Mutex::new(None),
        };
        voice.cancel().await;
        voice.cancel().await;
        assert!(matches!(voice.speak("hi").await, Err(Error::LocalVoice(_))));
    }
}

//! Wake word gate
//!
//! Keeps a continuous capture session running and watches every recognized fragment for
//! the trigger phrase. Sessions that end without a trigger are restarted after a fixed
//! debounce until the gate is stopped.

use std::time::Duration;

use regex::Regex;

use super::recognizer::SpeechRecognizer;
use super::session::{AudioInput, CaptureEvent, CaptureMode, CaptureSession};
use crate::{Error, Result};

/// Why [`WakeWordGate::listen`] returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// The trigger phrase was heard; `trailing` is whatever followed it
    Triggered { trailing: String },
    /// Microphone access was refused; the gate will not restart on its own
    PermissionDenied,
    /// Speech capture is not available on this platform
    Unsupported(String),
}

/// Listens for the trigger phrase
pub struct WakeWordGate {
    phrase: String,
    pattern: Regex,
    debounce: Duration,
    session: Option<CaptureSession>,
    restarts: u32,
}

impl WakeWordGate {
    /// Create a gate for `phrase`
    ///
    /// Matching is case-insensitive and tolerant of extra whitespace between words.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty phrase
    pub fn new(phrase: &str, debounce: Duration) -> Result<Self> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }

        let escaped: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
        let pattern = Regex::new(&format!("(?i){}", escaped.join(r"\s+")))
            .map_err(|e| Error::Config(format!("invalid wake phrase: {e}")))?;

        let phrase = words.join(" ").to_lowercase();
        tracing::debug!(phrase = %phrase, "wake word gate initialized");

        Ok(Self {
            phrase,
            pattern,
            debounce,
            session: None,
            restarts: 0,
        })
    }

    /// Look for the trigger phrase in `transcript`
    ///
    /// Returns the text after the first occurrence, with leading whitespace, commas and
    /// periods removed, or `None` when the phrase is absent.
    #[must_use]
    pub fn detect(&self, transcript: &str) -> Option<String> {
        let found = self.pattern.find(transcript)?;
        let trailing = transcript[found.end()..]
            .trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.')
            .trim_end();
        Some(trailing.to_string())
    }

    /// Listen until the phrase is heard or capture becomes impossible
    ///
    /// Cancel-safe: the running session is kept across calls, so dropping this future
    /// and calling again resumes the same session.
    pub async fn listen(
        &mut self,
        recognizer: &dyn SpeechRecognizer,
        input: &AudioInput,
    ) -> GateOutcome {
        loop {
            if self.session.is_none() {
                match CaptureSession::start(recognizer, input, CaptureMode::Continuous).await {
                    Ok(session) => self.session = Some(session),
                    Err(Error::PermissionDenied) => return GateOutcome::PermissionDenied,
                    Err(Error::CaptureUnsupported(reason)) => {
                        return GateOutcome::Unsupported(reason);
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "wake listener could not start");
                        self.restart_after_debounce().await;
                        continue;
                    }
                }
            }

            let event = match self.session.as_mut() {
                Some(session) => session.next_event().await,
                None => continue,
            };

            match event {
                Some(CaptureEvent::Interim(u) | CaptureEvent::Final(u)) => {
                    if let Some(trailing) = self.detect(&u.raw_text) {
                        self.stop_session();
                        tracing::info!(phrase = %self.phrase, has_command = !trailing.is_empty(), "wake word detected");
                        return GateOutcome::Triggered { trailing };
                    }
                }
                Some(CaptureEvent::NoInput) => {}
                Some(CaptureEvent::Failed(Error::PermissionDenied)) => {
                    self.stop_session();
                    return GateOutcome::PermissionDenied;
                }
                Some(CaptureEvent::Failed(Error::CaptureUnsupported(reason))) => {
                    self.stop_session();
                    return GateOutcome::Unsupported(reason);
                }
                Some(CaptureEvent::Failed(e)) => {
                    tracing::debug!(error = %e, "wake listener failed");
                    self.stop_session();
                    self.restart_after_debounce().await;
                }
                Some(CaptureEvent::Ended) | None => {
                    self.stop_session();
                    self.restart_after_debounce().await;
                }
            }
        }
    }

    async fn restart_after_debounce(&mut self) {
        self.restarts = self.restarts.saturating_add(1);
        tracing::debug!(restarts = self.restarts, "restarting wake listener");
        tokio::time::sleep(self.debounce).await;
    }

    fn stop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
    }

    /// Stop listening and release the input; idempotent
    pub fn stop(&mut self) {
        self.stop_session();
        self.restarts = 0;
    }

    /// Restarts since the gate was created or last stopped
    #[must_use]
    pub const fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Whether a session is currently open
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.session.is_some()
    }

    /// Normalized trigger phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(phrase: &str) -> WakeWordGate {
        WakeWordGate::new(phrase, Duration::from_millis(400)).unwrap()
    }

    #[test]
    fn test_detect_with_trailing_command() {
        let gate = gate("zoul");
        assert_eq!(gate.detect("Zoul, what time is it").as_deref(), Some("what time is it"));
        assert_eq!(gate.detect("hey ZOUL. open the door").as_deref(), Some("open the door"));
    }

    #[test]
    fn test_detect_bare_trigger() {
        let gate = gate("zoul");
        assert_eq!(gate.detect("zoul").as_deref(), Some(""));
        assert_eq!(gate.detect("  Zoul.  ").as_deref(), Some(""));
    }

    #[test]
    fn test_detect_absent() {
        let gate = gate("zoul");
        assert!(gate.detect("hello world").is_none());
        assert!(gate.detect("").is_none());
    }

    #[test]
    fn test_multi_word_phrase() {
        let gate = gate("Hey  Zoul");
        assert_eq!(gate.phrase(), "hey zoul");
        assert_eq!(gate.detect("HEY   zoul play music").as_deref(), Some("play music"));
        assert!(gate.detect("zoul play music").is_none());
    }

    #[test]
    fn test_non_ascii_transcript() {
        let gate = gate("zoul");
        assert_eq!(gate.detect("ÉCOUTE zoul, ça va").as_deref(), Some("ça va"));
    }

    #[test]
    fn test_empty_phrase_rejected() {
        assert!(WakeWordGate::new("   ", Duration::ZERO).is_err());
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut gate = gate("zoul");
        gate.stop();
        gate.stop();
        assert_eq!(gate.restarts(), 0);
        assert!(!gate.is_listening());
    }
}

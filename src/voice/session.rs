//! Capture sessions
//!
//! A [`CaptureSession`] is one attempt to listen for speech. It holds the exclusive claim
//! on the audio input for its whole lifetime and turns raw recognizer events into
//! ordered [`CaptureEvent`]s.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::recognizer::{RecognitionEvent, RecognitionStream, SpeechRecognizer};
use crate::{Error, Result};

/// How long a session listens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureMode {
    /// End after the first final result
    SingleUtterance,
    /// Keep listening until stopped
    Continuous,
}

/// Recognized speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub raw_text: String,
    pub is_final: bool,
    pub captured_at: DateTime<Utc>,
}

impl Utterance {
    fn new(raw_text: String, is_final: bool) -> Self {
        Self {
            raw_text,
            is_final,
            captured_at: Utc::now(),
        }
    }
}

/// Event emitted by a session
#[derive(Debug)]
pub enum CaptureEvent {
    Interim(Utterance),
    Final(Utterance),
    /// The recognizer heard no speech
    NoInput,
    /// The session finished; no further events follow
    Ended,
    /// The session failed; no further events follow
    Failed(Error),
}

/// The single audio input shared by every capture consumer
#[derive(Debug, Clone)]
pub struct AudioInput {
    permits: Arc<Semaphore>,
}

impl Default for AudioInput {
    fn default() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
        }
    }
}

impl AudioInput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the input without waiting
    ///
    /// # Errors
    ///
    /// Returns `Error::CaptureBusy` while another claim is held
    pub fn try_claim(&self) -> Result<InputClaim> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map(|permit| InputClaim { _permit: permit })
            .map_err(|_| Error::CaptureBusy)
    }

    /// Whether nobody holds the input
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.permits.available_permits() > 0
    }
}

/// Exclusive hold on the audio input; released on drop
#[derive(Debug)]
pub struct InputClaim {
    _permit: OwnedSemaphorePermit,
}

/// One listening attempt
pub struct CaptureSession {
    mode: CaptureMode,
    stream: Option<Box<dyn RecognitionStream>>,
    claim: Option<InputClaim>,
    pending: VecDeque<CaptureEvent>,
    finals: Vec<String>,
    interim_in_window: bool,
    finished: bool,
}

impl CaptureSession {
    /// Claim the input and open a recognition stream
    ///
    /// # Errors
    ///
    /// `Error::CaptureBusy` if the input is held elsewhere, or whatever the recognizer
    /// reports when opening (`CaptureUnsupported`, `PermissionDenied`, ...)
    pub async fn start(
        recognizer: &dyn SpeechRecognizer,
        input: &AudioInput,
        mode: CaptureMode,
    ) -> Result<Self> {
        let claim = input.try_claim()?;
        let stream = recognizer.open(mode).await?;

        tracing::info!(?mode, "capture session started");

        Ok(Self {
            mode,
            stream: Some(stream),
            claim: Some(claim),
            pending: VecDeque::new(),
            finals: Vec::new(),
            interim_in_window: false,
            finished: false,
        })
    }

    /// Next event, `None` after the session has ended, failed or been stopped
    ///
    /// Cancel-safe.
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if matches!(event, CaptureEvent::Ended | CaptureEvent::Failed(_)) {
                    self.release();
                }
                return Some(event);
            }

            if self.finished {
                return None;
            }
            let Some(stream) = self.stream.as_mut() else {
                self.finished = true;
                return None;
            };

            match stream.next_event().await {
                None | Some(RecognitionEvent::End) => self.pending.push_back(CaptureEvent::Ended),
                Some(RecognitionEvent::NoInput) => {
                    self.pending.push_back(CaptureEvent::NoInput);
                    if self.mode == CaptureMode::SingleUtterance {
                        self.pending.push_back(CaptureEvent::Ended);
                    }
                }
                Some(RecognitionEvent::Error(e)) => self.pending.push_back(CaptureEvent::Failed(e)),
                Some(RecognitionEvent::Result { text, is_final }) => self.accept(&text, is_final),
            }
        }
    }

    fn accept(&mut self, text: &str, is_final: bool) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        if !is_final {
            self.interim_in_window = true;
            self.pending
                .push_back(CaptureEvent::Interim(Utterance::new(text.to_string(), false)));
            return;
        }

        if !self.interim_in_window {
            self.pending
                .push_back(CaptureEvent::Interim(Utterance::new(text.to_string(), false)));
        }
        self.interim_in_window = false;
        self.finals.push(text.to_string());
        self.pending
            .push_back(CaptureEvent::Final(Utterance::new(text.to_string(), true)));

        if self.mode == CaptureMode::SingleUtterance {
            self.pending.push_back(CaptureEvent::Ended);
        }
    }

    /// Stop listening and release the input; idempotent
    pub fn stop(&mut self) {
        if self.finished && self.stream.is_none() && self.claim.is_none() {
            return;
        }
        self.pending.clear();
        self.release();
        tracing::debug!(mode = ?self.mode, "capture session stopped");
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        self.claim = None;
        self.finished = true;
    }

    /// Final text so far.
    ///
    /// Fragments are trimmed and joined with one space rather than concatenated as-is:
    /// recognized segments arrive without boundary whitespace.
    #[must_use]
    pub fn transcript(&self) -> String {
        self.finals.join(" ")
    }

    #[must_use]
    pub const fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Whether the session has ended or been stopped
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct Canned(Vec<RecognitionEvent>);

    #[async_trait]
    impl RecognitionStream for Canned {
        async fn next_event(&mut self) -> Option<RecognitionEvent> {
            if self.0.is_empty() {
                None
            } else {
                Some(self.0.remove(0))
            }
        }

        fn stop(&mut self) {
            self.0.clear();
        }
    }

    struct CannedRecognizer(fn() -> Vec<RecognitionEvent>);

    #[async_trait]
    impl SpeechRecognizer for CannedRecognizer {
        async fn open(&self, _mode: CaptureMode) -> Result<Box<dyn RecognitionStream>> {
            Ok(Box::new(Canned((self.0)())))
        }
    }

    fn result(text: &str, is_final: bool) -> RecognitionEvent {
        RecognitionEvent::Result {
            text: text.to_string(),
            is_final,
        }
    }

    #[tokio::test]
    async fn test_final_without_interim_gets_one() {
        let recognizer = CannedRecognizer(|| vec![result("hello", true)]);
        let input = AudioInput::new();
        let mut session = CaptureSession::start(&recognizer, &input, CaptureMode::SingleUtterance)
            .await
            .unwrap();

        assert!(matches!(session.next_event().await, Some(CaptureEvent::Interim(u)) if u.raw_text == "hello" && !u.is_final));
        assert!(matches!(session.next_event().await, Some(CaptureEvent::Final(u)) if u.is_final));
        assert!(matches!(session.next_event().await, Some(CaptureEvent::Ended)));
        assert!(session.next_event().await.is_none());
        assert!(input.is_free());
    }

    #[tokio::test]
    async fn test_continuous_joins_finals() {
        let recognizer = CannedRecognizer(|| {
            vec![
                result("turn on", false),
                result(" turn on the ", true),
                result("lights", true),
                RecognitionEvent::End,
            ]
        });
        let input = AudioInput::new();
        let mut session = CaptureSession::start(&recognizer, &input, CaptureMode::Continuous)
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = session.next_event().await {
            kinds.push(match event {
                CaptureEvent::Interim(_) => "interim",
                CaptureEvent::Final(_) => "final",
                CaptureEvent::NoInput => "no-input",
                CaptureEvent::Ended => "ended",
                CaptureEvent::Failed(_) => "failed",
            });
        }
        assert_eq!(kinds, vec!["interim", "final", "interim", "final", "ended"]);
        assert_eq!(session.transcript(), "turn on the lights");
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let recognizer = CannedRecognizer(Vec::new);
        let input = AudioInput::new();
        let mut first = CaptureSession::start(&recognizer, &input, CaptureMode::Continuous)
            .await
            .unwrap();

        let second = CaptureSession::start(&recognizer, &input, CaptureMode::Continuous).await;
        assert!(matches!(second, Err(Error::CaptureBusy)));

        first.stop();
        first.stop();
        assert!(input.is_free());
        assert!(first.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_claim() {
        let recognizer = CannedRecognizer(Vec::new);
        let input = AudioInput::new();
        {
            let _session = CaptureSession::start(&recognizer, &input, CaptureMode::Continuous)
                .await
                .unwrap();
            assert!(!input.is_free());
        }
        assert!(input.is_free());
    }

    #[tokio::test]
    async fn test_no_input_in_single_mode_ends() {
        let recognizer = CannedRecognizer(|| vec![RecognitionEvent::NoInput]);
        let input = AudioInput::new();
        let mut session = CaptureSession::start(&recognizer, &input, CaptureMode::SingleUtterance)
            .await
            .unwrap();

        assert!(matches!(session.next_event().await, Some(CaptureEvent::NoInput)));
        assert!(matches!(session.next_event().await, Some(CaptureEvent::Ended)));
        assert!(session.transcript().is_empty());
    }
}

//! Speech recognition capability
//!
//! [`SpeechRecognizer`] is the platform seam the capture layer is built on. The production
//! implementation, [`MicRecognizer`], records the microphone on a dedicated thread,
//! segments it by energy and transcribes each segment with Whisper. Every segment is
//! reported as a final result.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::capture::{AudioCapture, samples_to_wav};
use super::segmenter::{SegmentEvent, Segmenter};
use super::session::CaptureMode;
use super::stt::SpeechToText;
use crate::config::{Settings, VoiceConfig};
use crate::{Error, Result};

/// How often the capture thread drains the device buffer
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Single-utterance capture gives up after this long without speech
const NO_INPUT_TIMEOUT: Duration = Duration::from_secs(8);

/// Continuous capture ends after this long and is restarted by its owner
const CONTINUOUS_LIMIT: Duration = Duration::from_secs(60);

/// Raw event from a recognition stream
#[derive(Debug)]
pub enum RecognitionEvent {
    /// Recognized text; `is_final` is false for provisional hypotheses
    Result { text: String, is_final: bool },
    /// The stream heard nothing it could recognize
    NoInput,
    /// The stream failed
    Error(Error),
    /// The stream ended normally
    End,
}

/// A running recognition stream
#[async_trait]
pub trait RecognitionStream: Send + Sync {
    /// Next event, or `None` once the stream is finished
    ///
    /// Must be cancel-safe: dropping the future before it resolves loses no event.
    async fn next_event(&mut self) -> Option<RecognitionEvent>;

    /// Stop recognizing; idempotent
    fn stop(&mut self);
}

/// Platform speech recognition
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a new recognition stream
    ///
    /// # Errors
    ///
    /// `Error::CaptureUnsupported` when recognition is unavailable, `Error::PermissionDenied`
    /// when microphone access is refused
    async fn open(&self, mode: CaptureMode) -> Result<Box<dyn RecognitionStream>>;
}

/// Recognizer used when voice is disabled
pub struct DisabledRecognizer;

#[async_trait]
impl SpeechRecognizer for DisabledRecognizer {
    async fn open(&self, _mode: CaptureMode) -> Result<Box<dyn RecognitionStream>> {
        Err(Error::CaptureUnsupported("voice is disabled".to_string()))
    }
}

/// What the capture thread reports
enum Captured {
    Segment(Vec<f32>, u32),
    NoInput,
    Failed(Error),
    Done,
}

/// Microphone + Whisper recognizer
pub struct MicRecognizer {
    settings: watch::Receiver<Settings>,
    voice: VoiceConfig,
}

impl MicRecognizer {
    #[must_use]
    pub const fn new(settings: watch::Receiver<Settings>, voice: VoiceConfig) -> Self {
        Self { settings, voice }
    }
}

#[async_trait]
impl SpeechRecognizer for MicRecognizer {
    async fn open(&self, mode: CaptureMode) -> Result<Box<dyn RecognitionStream>> {
        let settings = self.settings.borrow().clone();
        let credential = settings.credential().cloned().ok_or_else(|| {
            Error::CaptureUnsupported("speech transcription needs an API key".to_string())
        })?;
        let stt = SpeechToText::new(&self.voice.base_url, &self.voice.stt_model, credential)?;

        let stop = Arc::new(AtomicBool::new(false));
        let (captured_tx, captured_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_stop = Arc::clone(&stop);
        let sensitivity = settings.voice_sensitivity;
        std::thread::Builder::new()
            .name("zoul-capture".to_string())
            .spawn(move || record(mode, sensitivity, &thread_stop, ready_tx, &captured_tx))?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        let (events_tx, events_rx) = mpsc::channel(16);
        let task = tokio::spawn(transcribe_segments(stt, captured_rx, events_tx));

        tracing::debug!(?mode, sensitivity, "microphone recognizer opened");

        Ok(Box::new(MicStream {
            events: events_rx,
            stop,
            task,
        }))
    }
}

/// Capture loop; runs on its own thread because the cpal stream is not `Send`
fn record(
    mode: CaptureMode,
    sensitivity: u8,
    stop: &AtomicBool,
    ready: oneshot::Sender<Result<()>>,
    out: &mpsc::UnboundedSender<Captured>,
) {
    let mut capture = match AudioCapture::new().and_then(|mut c| c.start().map(|()| c)) {
        Ok(capture) => capture,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    let sample_rate = capture.sample_rate();
    let mut segmenter = Segmenter::new(sample_rate, sensitivity);
    let started = Instant::now();

    while !stop.load(Ordering::Relaxed) {
        std::thread::sleep(POLL_INTERVAL);

        if let Some(reason) = capture.take_failure() {
            let _ = out.send(Captured::Failed(Error::TransientCapture(reason)));
            return;
        }

        if let SegmentEvent::Complete(samples) = segmenter.push(&capture.take_buffer()) {
            let _ = out.send(Captured::Segment(samples, sample_rate));
            if mode == CaptureMode::SingleUtterance {
                break;
            }
        }

        let elapsed = started.elapsed();
        if mode == CaptureMode::SingleUtterance
            && !segmenter.heard_speech()
            && elapsed > NO_INPUT_TIMEOUT
        {
            let _ = out.send(Captured::NoInput);
            break;
        }
        if mode == CaptureMode::Continuous && elapsed > CONTINUOUS_LIMIT && !segmenter.is_speaking()
        {
            break;
        }
    }

    capture.stop();
    let _ = out.send(Captured::Done);
}

async fn transcribe_segments(
    stt: SpeechToText,
    mut captured: mpsc::UnboundedReceiver<Captured>,
    events: mpsc::Sender<RecognitionEvent>,
) {
    while let Some(item) = captured.recv().await {
        let event = match item {
            Captured::Segment(samples, rate) => {
                let wav = match samples_to_wav(&samples, rate) {
                    Ok(wav) => wav,
                    Err(e) => {
                        let _ = events.send(RecognitionEvent::Error(e)).await;
                        return;
                    }
                };
                match stt.transcribe(&wav).await {
                    Ok(text) if text.trim().is_empty() => continue,
                    Ok(text) => RecognitionEvent::Result {
                        text,
                        is_final: true,
                    },
                    Err(e) => RecognitionEvent::Error(Error::TransientCapture(e.to_string())),
                }
            }
            Captured::NoInput => RecognitionEvent::NoInput,
            Captured::Failed(e) => RecognitionEvent::Error(e),
            Captured::Done => RecognitionEvent::End,
        };

        let terminal = matches!(event, RecognitionEvent::Error(_) | RecognitionEvent::End);
        if events.send(event).await.is_err() || terminal {
            return;
        }
    }
    let _ = events.send(RecognitionEvent::End).await;
}

struct MicStream {
    events: mpsc::Receiver<RecognitionEvent>,
    stop: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

#[async_trait]
impl RecognitionStream for MicStream {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        self.events.recv().await
    }

    fn stop(&mut self) {
        if !self.stop.swap(true, Ordering::Relaxed) {
            self.task.abort();
            self.events.close();
            tracing::debug!("microphone recognizer stopped");
        }
    }
}

impl Drop for MicStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_recognizer_is_unsupported() {
        let result = DisabledRecognizer.open(CaptureMode::SingleUtterance).await;
        assert!(matches!(result, Err(Error::CaptureUnsupported(_))));
    }

    #[tokio::test]
    async fn test_mic_recognizer_needs_credential() {
        let (_tx, rx) = watch::channel(Settings::default());
        let recognizer = MicRecognizer::new(rx, VoiceConfig::default());
        let result = recognizer.open(CaptureMode::Continuous).await;
        assert!(matches!(result, Err(Error::CaptureUnsupported(_))));
    }
}

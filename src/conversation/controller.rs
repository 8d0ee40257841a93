//! The conversation controller
//!
//! A single task that owns the conversation state. Each phase races its long-running
//! operation (wake listening, capture, completion, speech) against incoming commands
//! and settings changes; the select yields an outcome value that is acted on only after
//! the losing futures are dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, watch};

use super::state::{ConversationState, Snapshot, Transition};
use crate::completion::CompletionDispatcher;
use crate::config::{Settings, VoiceConfig};
use crate::history::{MessageLog, Role};
use crate::voice::{
    AudioInput, CaptureEvent, CaptureMode, CaptureSession, GateOutcome, MicrophonePermission,
    PermissionStatus, SpeechRecognizer, SpeechSynthesizer, WakeWordGate,
};
use crate::{Error, Result};

/// Reply logged when a turn fails past every fallback
pub const ERROR_REPLY: &str =
    "I encountered an error while processing your request. Please try again.";

/// Notice shown while the microphone is blocked
pub const PERMISSION_NOTICE: &str =
    "Microphone access is blocked. Allow microphone access and press retry to use voice.";

/// One-time message logged when speech capture is unavailable
pub const UNSUPPORTED_NOTICE: &str =
    "Voice input isn't available on this device. You can still type your messages.";

const COMMAND_BUFFER: usize = 32;
const TRANSITION_BUFFER: usize = 64;

/// Requests from the UI collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start capturing an utterance (also interrupts speech)
    StartCapture,
    /// Stop capture or abandon the current turn
    StopCapture,
    /// Leave the permission-denied or error state
    Retry,
    /// Process typed text as if it were spoken
    Submit(String),
    /// Stop the controller
    Shutdown,
}

/// Capabilities the controller drives
#[derive(Clone)]
pub struct Components {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub permission: Arc<dyn MicrophonePermission>,
    pub dispatcher: CompletionDispatcher,
    pub synthesizer: SpeechSynthesizer,
}

/// Controller tuning
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub wake_phrase: String,
    pub wake_debounce: Duration,
    /// Spoken after a bare wake word, before capture
    pub acknowledgement: Option<String>,
    /// Restarts of a main capture session after transient failures
    pub capture_retries: u32,
    /// Delay before the first restart; doubles each time
    pub retry_backoff: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self::from_voice(&VoiceConfig::default())
    }
}

impl ControllerOptions {
    #[must_use]
    pub fn from_voice(voice: &VoiceConfig) -> Self {
        Self {
            wake_phrase: voice.wake_phrase.clone(),
            wake_debounce: voice.wake_debounce,
            acknowledgement: voice.acknowledgement.clone(),
            capture_retries: 2,
            retry_backoff: Duration::from_millis(250),
        }
    }
}

/// Cloneable handle for talking to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    transitions: broadcast::Sender<Transition>,
    log: MessageLog,
}

impl ControllerHandle {
    /// Queue a command
    ///
    /// # Errors
    ///
    /// `Error::InternalState` once the controller has stopped
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::InternalState("conversation controller has stopped".to_string()))
    }

    /// # Errors
    ///
    /// See [`Self::send`]
    pub async fn start_capture(&self) -> Result<()> {
        self.send(Command::StartCapture).await
    }

    /// # Errors
    ///
    /// See [`Self::send`]
    pub async fn stop_capture(&self) -> Result<()> {
        self.send(Command::StopCapture).await
    }

    /// # Errors
    ///
    /// See [`Self::send`]
    pub async fn retry(&self) -> Result<()> {
        self.send(Command::Retry).await
    }

    /// # Errors
    ///
    /// See [`Self::send`]
    pub async fn submit(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::Submit(text.into())).await
    }

    /// # Errors
    ///
    /// See [`Self::send`]
    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Current observable state
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch the observable state
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Receive every state transition from now on
    #[must_use]
    pub fn transitions(&self) -> broadcast::Receiver<Transition> {
        self.transitions.subscribe()
    }

    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Whether the controller has stopped
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// What the controller does next
#[derive(Debug)]
enum Step {
    Rest,
    Idle,
    Listen,
    Capture,
    Process(String),
    Speak(String),
    Blocked,
    Shutdown,
}

/// Outcome of a phase's select
enum Event<T> {
    Command(Option<Command>),
    Settings(bool),
    Done(T),
}

/// The conversation state machine
pub struct ConversationController {
    components: Components,
    options: ControllerOptions,
    settings: watch::Receiver<Settings>,
    settings_open: bool,
    commands: mpsc::Receiver<Command>,
    snapshot: watch::Sender<Snapshot>,
    transitions: broadcast::Sender<Transition>,
    log: MessageLog,
    input: AudioInput,
    gate: WakeWordGate,
    state: ConversationState,
    unsupported_notified: bool,
}

impl ConversationController {
    /// Build a controller and its handle
    ///
    /// # Errors
    ///
    /// `Error::Config` for an empty wake phrase
    pub fn new(
        components: Components,
        options: ControllerOptions,
        settings: watch::Receiver<Settings>,
        log: MessageLog,
    ) -> Result<(Self, ControllerHandle)> {
        let gate = WakeWordGate::new(&options.wake_phrase, options.wake_debounce)?;
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(Snapshot::default());
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

        let handle = ControllerHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            transitions: transitions.clone(),
            log: log.clone(),
        };

        let controller = Self {
            components,
            options,
            settings,
            settings_open: true,
            commands: command_rx,
            snapshot: snapshot_tx,
            transitions,
            log,
            input: AudioInput::new(),
            gate,
            state: ConversationState::Idle,
            unsupported_notified: false,
        };

        Ok((controller, handle))
    }

    /// Run until `Command::Shutdown` or until every handle is dropped
    pub async fn run(mut self) {
        tracing::info!("conversation controller started");

        let mut step = Step::Rest;
        loop {
            tracing::trace!(?step, state = %self.state, "next step");
            step = match step {
                Step::Rest => self.rest(),
                Step::Idle => self.idle().await,
                Step::Listen => self.listen().await,
                Step::Capture => self.capture().await,
                Step::Process(text) => self.process(text).await,
                Step::Speak(reply) => self.speak(reply).await,
                Step::Blocked => self.blocked().await,
                Step::Shutdown => break,
            };
        }

        self.gate.stop();
        self.components.synthesizer.stop().await;
        self.publish(|s| {
            s.speaking = false;
            s.interim_transcript.clear();
        });
        tracing::info!("conversation controller stopped");
    }

    fn settings_snapshot(&self) -> Settings {
        self.settings.borrow().clone()
    }

    fn voice_available(&self) -> bool {
        self.snapshot.borrow().voice_available
    }

    fn permission(&self) -> PermissionStatus {
        self.snapshot.borrow().permission
    }

    fn publish(&self, modify: impl FnOnce(&mut Snapshot)) {
        self.snapshot.send_modify(modify);
    }

    /// Move to `to` if the table allows it; same-state moves are no-ops
    fn transition(&mut self, to: ConversationState) -> bool {
        let from = self.state;
        if from == to {
            return true;
        }
        if !from.can_transition(to) {
            let err = Error::InternalState(format!("illegal transition {from} -> {to}"));
            tracing::error!(error = %err, "transition rejected");
            return false;
        }

        self.state = to;
        tracing::info!(%from, %to, "state transition");
        // Snapshot first, so a transition subscriber always reads the new state
        self.publish(|s| s.state = to);
        let _ = self.transitions.send(Transition {
            from,
            to,
            at: Utc::now(),
        });
        true
    }

    fn leave_blocked(&mut self) {
        if self.state.is_blocked() {
            self.transition(ConversationState::Idle);
        }
    }

    fn set_permission(&self, status: PermissionStatus) {
        self.publish(|s| {
            s.permission = status;
            if status == PermissionStatus::Granted && s.notice.as_deref() == Some(PERMISSION_NOTICE)
            {
                s.notice = None;
            }
        });
    }

    fn set_interim(&self, text: &str) {
        self.publish(|s| {
            s.interim_transcript.clear();
            s.interim_transcript.push_str(text);
        });
    }

    /// Refresh the permission status, prompting if undecided
    async fn ensure_permission(&self) -> PermissionStatus {
        let mut status = self.components.permission.status().await;
        if status == PermissionStatus::Prompt {
            tracing::debug!("requesting microphone permission");
            status = self.components.permission.request().await;
        }
        self.set_permission(status);
        status
    }

    fn deny(&mut self) -> Step {
        self.gate.stop();
        self.set_permission(PermissionStatus::Denied);
        self.publish(|s| s.notice = Some(PERMISSION_NOTICE.to_string()));
        self.transition(ConversationState::PermissionDenied);
        tracing::warn!("microphone permission denied");
        Step::Blocked
    }

    fn mark_unsupported(&mut self, reason: &str) {
        tracing::warn!(reason, "speech capture unsupported, voice disabled");
        self.publish(|s| s.voice_available = false);
        if !self.unsupported_notified {
            self.unsupported_notified = true;
            self.log.append(Role::System, UNSUPPORTED_NOTICE);
        }
    }

    fn fail_turn(&mut self, error: &Error) -> Step {
        tracing::error!(error = %error, "conversation turn failed");
        self.log.append(Role::Assistant, ERROR_REPLY);
        self.transition(ConversationState::Error);
        Step::Blocked
    }

    fn on_settings(&mut self, open: bool) {
        if !open {
            tracing::debug!("settings publisher closed, keeping last settings");
            self.settings_open = false;
            return;
        }
        // A settings change re-enables voice after an unsupported capability
        self.publish(|s| s.voice_available = true);
    }

    /// Settle into the resting state the settings call for
    fn rest(&mut self) -> Step {
        self.leave_blocked();
        self.set_interim("");

        let settings = self.settings_snapshot();
        if settings.wake_word_enabled
            && self.voice_available()
            && self.permission() != PermissionStatus::Denied
        {
            self.transition(ConversationState::WakeListening);
            Step::Listen
        } else {
            self.gate.stop();
            self.transition(ConversationState::Idle);
            Step::Idle
        }
    }

    async fn idle(&mut self) -> Step {
        loop {
            let event: Event<()> = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = self.settings.changed(), if self.settings_open => Event::Settings(res.is_ok()),
            };

            match event {
                Event::Command(Some(Command::StartCapture)) => {
                    if self.voice_available() {
                        return Step::Capture;
                    }
                    tracing::debug!("voice unavailable, ignoring capture request");
                }
                Event::Command(Some(Command::Submit(text))) => return Step::Process(text),
                Event::Command(Some(Command::StopCapture | Command::Retry)) => {}
                Event::Command(Some(Command::Shutdown) | None) => return Step::Shutdown,
                Event::Settings(open) => {
                    self.on_settings(open);
                    if open {
                        return Step::Rest;
                    }
                }
                Event::Done(()) => {}
            }
        }
    }

    async fn listen(&mut self) -> Step {
        if self.ensure_permission().await != PermissionStatus::Granted {
            return self.deny();
        }

        loop {
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = self.settings.changed(), if self.settings_open => Event::Settings(res.is_ok()),
                outcome = self.gate.listen(self.components.recognizer.as_ref(), &self.input) => Event::Done(outcome),
            };

            match event {
                Event::Done(GateOutcome::Triggered { trailing }) => {
                    if trailing.is_empty() {
                        return self.acknowledge().await;
                    }
                    return Step::Process(trailing);
                }
                Event::Done(GateOutcome::PermissionDenied) => return self.deny(),
                Event::Done(GateOutcome::Unsupported(reason)) => {
                    self.gate.stop();
                    self.mark_unsupported(&reason);
                    return Step::Rest;
                }
                Event::Command(Some(Command::StartCapture)) => {
                    self.gate.stop();
                    return Step::Capture;
                }
                Event::Command(Some(Command::Submit(text))) => {
                    self.gate.stop();
                    return Step::Process(text);
                }
                Event::Command(Some(Command::StopCapture | Command::Retry)) => {}
                Event::Command(Some(Command::Shutdown) | None) => return Step::Shutdown,
                Event::Settings(open) => {
                    self.on_settings(open);
                    if !self.settings.borrow().wake_word_enabled {
                        tracing::info!("wake word disabled, stopping listener");
                        self.gate.stop();
                        return Step::Rest;
                    }
                }
            }
        }
    }

    /// Speak the acknowledgement, if any, then capture
    async fn acknowledge(&mut self) -> Step {
        let Some(phrase) = self.options.acknowledgement.clone() else {
            return Step::Capture;
        };
        let credential = self.settings_snapshot().credential().cloned();
        let synthesizer = self.components.synthesizer.clone();

        self.publish(|s| s.speaking = true);
        let event = tokio::select! {
            biased;
            cmd = self.commands.recv() => Event::Command(cmd),
            res = synthesizer.speak(&phrase, credential.as_ref()) => Event::Done(res),
        };
        self.publish(|s| s.speaking = false);

        match event {
            Event::Done(Ok(_)) => Step::Capture,
            Event::Done(Err(e)) => {
                tracing::warn!(error = %e, "acknowledgement failed");
                Step::Capture
            }
            Event::Command(cmd) => {
                synthesizer.stop().await;
                match cmd {
                    Some(Command::Submit(text)) => Step::Process(text),
                    Some(Command::StopCapture) => Step::Rest,
                    Some(Command::Shutdown) | None => Step::Shutdown,
                    Some(Command::StartCapture | Command::Retry) => Step::Capture,
                }
            }
            Event::Settings(_) => Step::Capture,
        }
    }

    async fn capture(&mut self) -> Step {
        self.gate.stop();
        if !self.voice_available() {
            return Step::Rest;
        }
        if self.ensure_permission().await != PermissionStatus::Granted {
            return self.deny();
        }

        self.leave_blocked();
        if !self.transition(ConversationState::Capturing) {
            return Step::Rest;
        }
        self.set_interim("");

        let mut retries = 0;
        loop {
            let started = CaptureSession::start(
                self.components.recognizer.as_ref(),
                &self.input,
                CaptureMode::SingleUtterance,
            )
            .await;
            let mut session = match started {
                Ok(session) => session,
                Err(e) => match self.capture_failed(e, &mut retries).await {
                    Some(step) => return step,
                    None => continue,
                },
            };

            let result = loop {
                let event = tokio::select! {
                    biased;
                    cmd = self.commands.recv() => Event::Command(cmd),
                    res = self.settings.changed(), if self.settings_open => Event::Settings(res.is_ok()),
                    ev = session.next_event() => Event::Done(ev),
                };

                match event {
                    Event::Done(Some(CaptureEvent::Interim(u) | CaptureEvent::Final(u))) => {
                        self.set_interim(&u.raw_text);
                    }
                    Event::Done(Some(CaptureEvent::NoInput)) => tracing::debug!("no speech heard"),
                    Event::Done(Some(CaptureEvent::Ended) | None) => break Ok(session.transcript()),
                    Event::Done(Some(CaptureEvent::Failed(e))) => break Err(e),
                    Event::Command(Some(Command::StopCapture)) => {
                        session.stop();
                        tracing::info!("capture stopped by user");
                        return Step::Rest;
                    }
                    Event::Command(Some(Command::Submit(text))) => {
                        session.stop();
                        return Step::Process(text);
                    }
                    Event::Command(Some(Command::StartCapture | Command::Retry)) => {}
                    Event::Command(Some(Command::Shutdown) | None) => {
                        session.stop();
                        return Step::Shutdown;
                    }
                    Event::Settings(open) => self.on_settings(open),
                }
            };
            session.stop();

            match result {
                Ok(text) if !text.trim().is_empty() => return Step::Process(text),
                Ok(_) => {
                    tracing::debug!("capture ended without speech");
                    return Step::Rest;
                }
                Err(e) => {
                    if let Some(step) = self.capture_failed(e, &mut retries).await {
                        return step;
                    }
                }
            }
        }
    }

    /// Decide what a capture failure means; `None` means try again
    async fn capture_failed(&mut self, error: Error, retries: &mut u32) -> Option<Step> {
        match error {
            Error::PermissionDenied => Some(self.deny()),
            Error::CaptureUnsupported(reason) => {
                self.mark_unsupported(&reason);
                Some(Step::Rest)
            }
            e if e.is_retryable() && *retries < self.options.capture_retries => {
                let delay = self.options.retry_backoff * 2u32.pow(*retries);
                *retries += 1;
                tracing::warn!(error = %e, attempt = *retries, delay_ms = delay.as_millis(), "capture failed, retrying");
                self.back_off(delay).await
            }
            e if e.is_non_fatal() => {
                tracing::debug!(reason = %e, "capture ended");
                Some(Step::Rest)
            }
            e => {
                tracing::warn!(error = %e, "capture failed");
                Some(Step::Rest)
            }
        }
    }

    /// Wait out a retry delay while still honoring commands
    async fn back_off(&mut self, delay: Duration) -> Option<Step> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = self.settings.changed(), if self.settings_open => Event::Settings(res.is_ok()),
                () = &mut sleep => Event::Done(()),
            };

            match event {
                Event::Done(()) => return None,
                Event::Command(Some(Command::StopCapture)) => {
                    tracing::info!("capture stopped by user");
                    return Some(Step::Rest);
                }
                Event::Command(Some(Command::Submit(text))) => return Some(Step::Process(text)),
                Event::Command(Some(Command::StartCapture | Command::Retry)) => {}
                Event::Command(Some(Command::Shutdown) | None) => return Some(Step::Shutdown),
                Event::Settings(open) => self.on_settings(open),
            }
        }
    }

    async fn process(&mut self, text: String) -> Step {
        self.gate.stop();
        let text = text.trim().to_string();
        if text.is_empty() {
            return Step::Rest;
        }

        self.leave_blocked();
        if !self.state.can_transition(ConversationState::Processing) {
            self.transition(ConversationState::Idle);
        }
        if !self.transition(ConversationState::Processing) {
            return Step::Rest;
        }
        self.set_interim("");

        let settings = self.settings_snapshot();
        let history = self.log.messages();
        self.log.append(Role::User, text.as_str());
        let dispatcher = self.components.dispatcher.clone();
        let reply = dispatcher.reply(&history, &text, &settings);
        tokio::pin!(reply);

        loop {
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = &mut reply => Event::Done(res),
            };

            match event {
                Event::Done(Ok(reply)) => return Step::Speak(reply),
                Event::Done(Err(e)) => return self.fail_turn(&e),
                Event::Command(Some(Command::StopCapture)) => {
                    tracing::info!("turn abandoned");
                    return Step::Rest;
                }
                Event::Command(Some(Command::StartCapture)) => return Step::Capture,
                Event::Command(Some(Command::Submit(next))) => return Step::Process(next),
                Event::Command(Some(Command::Retry)) => {}
                Event::Command(Some(Command::Shutdown) | None) => return Step::Shutdown,
                Event::Settings(_) => {}
            }
        }
    }

    async fn speak(&mut self, reply: String) -> Step {
        self.log.append(Role::Assistant, reply.as_str());
        if !self.transition(ConversationState::Speaking) {
            return Step::Rest;
        }

        let credential = self.settings_snapshot().credential().cloned();
        let synthesizer = self.components.synthesizer.clone();
        let mut speech = Box::pin(synthesizer.speak(&reply, credential.as_ref()));
        self.publish(|s| s.speaking = true);

        let next = loop {
            let event = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = &mut speech => Event::Done(res),
            };

            match event {
                Event::Done(Ok(route)) => {
                    tracing::debug!(?route, "reply spoken");
                    let settings = self.settings_snapshot();
                    break if settings.continuous_capture_enabled && self.voice_available() {
                        Step::Capture
                    } else {
                        Step::Rest
                    };
                }
                Event::Done(Err(e)) => {
                    self.publish(|s| s.speaking = false);
                    return self.fail_turn(&e);
                }
                Event::Command(Some(Command::StopCapture)) => break Step::Rest,
                Event::Command(Some(Command::StartCapture)) => break Step::Capture,
                Event::Command(Some(Command::Submit(text))) => break Step::Process(text),
                Event::Command(Some(Command::Retry)) => {}
                Event::Command(Some(Command::Shutdown) | None) => break Step::Shutdown,
                Event::Settings(_) => {}
            }
        };

        // Drop the in-flight speech before releasing the output
        drop(speech);
        synthesizer.stop().await;
        self.publish(|s| s.speaking = false);
        next
    }

    async fn blocked(&mut self) -> Step {
        loop {
            let event: Event<()> = tokio::select! {
                biased;
                cmd = self.commands.recv() => Event::Command(cmd),
                res = self.settings.changed(), if self.settings_open => Event::Settings(res.is_ok()),
            };

            match event {
                Event::Command(Some(Command::Retry)) => {
                    tracing::info!("retry requested");
                    if self.permission() == PermissionStatus::Denied {
                        // Ask again on the next capture
                        self.set_permission(PermissionStatus::Prompt);
                    }
                    return Step::Rest;
                }
                Event::Command(Some(Command::StartCapture)) => return Step::Capture,
                Event::Command(Some(Command::Submit(text))) => return Step::Process(text),
                Event::Command(Some(Command::StopCapture)) => {}
                Event::Command(Some(Command::Shutdown) | None) => return Step::Shutdown,
                Event::Settings(open) => {
                    self.on_settings(open);
                    if open {
                        if self.permission() == PermissionStatus::Denied {
                            self.set_permission(PermissionStatus::Prompt);
                        }
                        return Step::Rest;
                    }
                }
                Event::Done(()) => {}
            }
        }
    }
}

//! Shared test utilities
//!
//! Fakes for every platform capability the controller drives, plus a ledger that records
//! who holds the audio resource.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use zoul_voice::completion::{CompletionDispatcher, CompletionRequest, CompletionService};
use zoul_voice::conversation::{
    Components, ControllerHandle, ControllerOptions, ConversationController, ConversationState,
    Snapshot, Transition,
};
use zoul_voice::voice::{
    AudioBuffer, AudioOutput, CaptureMode, LocalVoice, MicrophonePermission, PermissionStatus,
    RecognitionEvent, RecognitionStream, SpeechRecognizer, SpeechSynthesizer, SynthesisService,
};
use zoul_voice::{Error, MessageLog, Result, Settings};

/// How long any single wait in a test may take
pub const WAIT: Duration = Duration::from_secs(5);

/// Counts simultaneous holders of the audio resource
#[derive(Default)]
pub struct ResourceLedger {
    active: AtomicUsize,
    peak: AtomicUsize,
    violations: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl ResourceLedger {
    pub fn hold(self: &Arc<Self>, who: &'static str) -> Hold {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if now > 1 {
            self.violations.fetch_add(1, Ordering::SeqCst);
        }
        self.events.lock().unwrap().push(format!("+{who}"));
        Hold {
            ledger: Arc::clone(self),
            who,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn violations(&self) -> usize {
        self.violations.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

/// Held while a fake uses the audio resource
pub struct Hold {
    ledger: Arc<ResourceLedger>,
    who: &'static str,
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.ledger.active.fetch_sub(1, Ordering::SeqCst);
        self.ledger
            .events
            .lock()
            .unwrap()
            .push(format!("-{}", self.who));
    }
}

/// One step of a scripted recognition stream
pub enum Step {
    Emit(RecognitionEvent),
    Delay(Duration),
    /// Never produce another event (a quiet room)
    Hang,
}

pub fn interim(text: &str) -> Step {
    Step::Emit(RecognitionEvent::Result {
        text: text.to_string(),
        is_final: false,
    })
}

pub fn final_text(text: &str) -> Step {
    Step::Emit(RecognitionEvent::Result {
        text: text.to_string(),
        is_final: true,
    })
}

/// What the next `open` produces
pub type Script = Result<Vec<Step>>;

/// Recognizer that plays back one script per opened stream; hangs once scripts run out
pub struct ScriptedRecognizer {
    scripts: Mutex<VecDeque<Script>>,
    ledger: Arc<ResourceLedger>,
    opens: AtomicUsize,
    modes: Mutex<Vec<CaptureMode>>,
}

impl ScriptedRecognizer {
    pub fn new(scripts: Vec<Script>, ledger: Arc<ResourceLedger>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ledger,
            opens: AtomicUsize::new(0),
            modes: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<CaptureMode> {
        self.modes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn open(&self, mode: CaptureMode) -> Result<Box<dyn RecognitionStream>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);

        let next = self.scripts.lock().unwrap().pop_front();
        let steps = match next {
            Some(Ok(steps)) => steps,
            Some(Err(e)) => return Err(e),
            None => vec![Step::Hang],
        };

        Ok(Box::new(ScriptedStream {
            steps: steps.into(),
            hold: Some(self.ledger.hold("mic")),
        }))
    }
}

struct ScriptedStream {
    steps: VecDeque<Step>,
    hold: Option<Hold>,
}

#[async_trait]
impl RecognitionStream for ScriptedStream {
    async fn next_event(&mut self) -> Option<RecognitionEvent> {
        loop {
            if self.hold.is_none() {
                return None;
            }
            match self.steps.front() {
                None => return None,
                Some(Step::Hang) => std::future::pending::<()>().await,
                Some(Step::Delay(d)) => {
                    let d = *d;
                    tokio::time::sleep(d).await;
                    self.steps.pop_front();
                }
                Some(Step::Emit(_)) => {
                    if let Some(Step::Emit(event)) = self.steps.pop_front() {
                        return Some(event);
                    }
                }
            }
        }
    }

    fn stop(&mut self) {
        self.steps.clear();
        self.hold = None;
    }
}

/// Permission that answers whatever it is set to
pub struct FakePermission {
    status: Mutex<PermissionStatus>,
    requests: AtomicUsize,
}

impl FakePermission {
    pub fn new(status: PermissionStatus) -> Self {
        Self {
            status: Mutex::new(status),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, status: PermissionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MicrophonePermission for FakePermission {
    async fn status(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request(&self) -> PermissionStatus {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap()
    }
}

/// Speaker that "plays" for a fixed time
pub struct FakeOutput {
    ledger: Arc<ResourceLedger>,
    duration: Duration,
    plays: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeOutput {
    pub fn new(ledger: Arc<ResourceLedger>, duration: Duration) -> Self {
        Self {
            ledger,
            duration,
            plays: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn plays(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioOutput for FakeOutput {
    async fn play(&self, _buffer: AudioBuffer) -> Result<()> {
        self.plays.fetch_add(1, Ordering::SeqCst);
        let _hold = self.ledger.hold("speaker");
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Local voice that records what it was asked to say
pub struct FakeLocalVoice {
    ledger: Arc<ResourceLedger>,
    duration: Duration,
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl FakeLocalVoice {
    pub fn new(ledger: Arc<ResourceLedger>, duration: Duration) -> Self {
        Self {
            ledger,
            duration,
            spoken: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocalVoice for FakeLocalVoice {
    async fn speak(&self, text: &str) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        let _hold = self.ledger.hold("voice");
        tokio::time::sleep(self.duration).await;
        Ok(())
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

/// Completion service with a fixed answer, or a network failure when `reply` is `None`
pub struct FakeCompletion {
    reply: Option<String>,
    calls: AtomicUsize,
}

impl FakeCompletion {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for FakeCompletion {
    async fn complete(&self, _: &SecretString, _: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| Error::RemoteService("connection refused".to_string()))
    }
}

/// Synthesis service that always fails
pub struct FailingSynthesis;

#[async_trait]
impl SynthesisService for FailingSynthesis {
    async fn synthesize(&self, _: &SecretString, _: &str) -> Result<Vec<u8>> {
        Err(Error::RemoteService("503 Service Unavailable".to_string()))
    }
}

pub fn credential() -> SecretString {
    SecretString::from("sk-test".to_string())
}

/// Options with short timings for tests
pub fn fast_options() -> ControllerOptions {
    ControllerOptions {
        wake_phrase: "zoul".to_string(),
        wake_debounce: Duration::from_millis(10),
        acknowledgement: None,
        capture_retries: 2,
        retry_backoff: Duration::from_millis(10),
    }
}

/// Poll `cond` until it holds
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

/// Controller configuration for one test
pub struct Setup {
    pub settings: Settings,
    pub options: ControllerOptions,
    pub scripts: Vec<Script>,
    pub permission: PermissionStatus,
    pub completion: FakeCompletion,
    pub speech: Duration,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            settings: Settings {
                wake_word_enabled: false,
                ..Settings::default()
            },
            options: fast_options(),
            scripts: Vec::new(),
            permission: PermissionStatus::Granted,
            completion: FakeCompletion::replying("remote reply"),
            speech: Duration::from_millis(20),
        }
    }
}

/// A running controller and its fakes
pub struct Harness {
    pub handle: ControllerHandle,
    pub transitions: broadcast::Receiver<Transition>,
    pub settings: Arc<watch::Sender<Settings>>,
    pub ledger: Arc<ResourceLedger>,
    pub recognizer: Arc<ScriptedRecognizer>,
    pub permission: Arc<FakePermission>,
    pub completion: Arc<FakeCompletion>,
    pub output: Arc<FakeOutput>,
    pub voice: Arc<FakeLocalVoice>,
    pub task: JoinHandle<()>,
}

impl Setup {
    pub fn start(self) -> Harness {
        let ledger = Arc::new(ResourceLedger::default());
        let recognizer = Arc::new(ScriptedRecognizer::new(self.scripts, Arc::clone(&ledger)));
        let permission = Arc::new(FakePermission::new(self.permission));
        let completion = Arc::new(self.completion);
        let output = Arc::new(FakeOutput::new(Arc::clone(&ledger), self.speech));
        let voice = Arc::new(FakeLocalVoice::new(Arc::clone(&ledger), self.speech));

        let components = Components {
            recognizer: recognizer.clone(),
            permission: permission.clone(),
            dispatcher: CompletionDispatcher::new(completion.clone()),
            synthesizer: SpeechSynthesizer::new(
                Arc::new(FailingSynthesis),
                output.clone(),
                voice.clone(),
            ),
        };

        let (settings, settings_rx) = watch::channel(self.settings);
        let (controller, handle) =
            ConversationController::new(components, self.options, settings_rx, MessageLog::new())
                .expect("controller");
        let transitions = handle.transitions();
        let task = tokio::spawn(controller.run());

        Harness {
            handle,
            transitions,
            settings: Arc::new(settings),
            ledger,
            recognizer,
            permission,
            completion,
            output,
            voice,
            task,
        }
    }
}

impl Harness {
    /// Target states of the next `n` transitions
    pub async fn states(&mut self, n: usize) -> Vec<ConversationState> {
        let mut states = Vec::with_capacity(n);
        for _ in 0..n {
            let t = tokio::time::timeout(WAIT, self.transitions.recv())
                .await
                .expect("timed out waiting for a transition")
                .expect("transition channel closed");
            states.push(t.to);
        }
        states
    }

    /// Wait until the snapshot satisfies `pred`
    pub async fn wait_for(&self, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        let mut rx = self.handle.subscribe();
        tokio::time::timeout(WAIT, async {
            loop {
                {
                    let snapshot = rx.borrow_and_update();
                    if pred(&snapshot) {
                        return snapshot.clone();
                    }
                }
                rx.changed().await.expect("controller dropped snapshot");
            }
        })
        .await
        .expect("timed out waiting for snapshot")
    }

    /// Wait until the controller is in `state`
    pub async fn wait_for_state(&self, state: ConversationState) -> Snapshot {
        self.wait_for(|s| s.state == state).await
    }

    /// Shut down and wait for the controller task
    pub async fn shutdown(self) -> Arc<ResourceLedger> {
        self.handle.shutdown().await.expect("controller running");
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("controller did not stop")
            .expect("controller panicked");
        self.ledger
    }
}

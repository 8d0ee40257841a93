//! Voice processing
//!
//! Microphone capture and recognition, the wake word gate, speech synthesis and playback.
//! Each platform capability sits behind a trait so the conversation controller can be
//! driven by fakes.

mod capture;
mod local_tts;
mod permission;
mod playback;
mod recognizer;
mod segmenter;
mod session;
mod stt;
mod tts;
mod wake_word;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use local_tts::{Engine, LocalVoice, PITCH, RATE, SystemVoice, VoiceInfo, select_voice};
pub use permission::{DevicePermission, MicrophonePermission, PermissionStatus, StaticPermission};
pub use playback::{
    AudioBuffer, AudioOutput, AudioPlaybackEngine, Envelope, FADE, SILENT_GAIN, STOP_RAMP,
    decode_mp3,
};
pub use recognizer::{
    DisabledRecognizer, MicRecognizer, RecognitionEvent, RecognitionStream, SpeechRecognizer,
};
pub use segmenter::{SegmentEvent, Segmenter, rms, threshold_for};
pub use session::{AudioInput, CaptureEvent, CaptureMode, CaptureSession, InputClaim, Utterance};
pub use stt::SpeechToText;
pub use tts::{OpenAiSpeech, SpeechRoute, SpeechSynthesizer, SynthesisService};
pub use wake_word::{GateOutcome, WakeWordGate};

//! Conversation states and the UI-facing snapshot

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::voice::PermissionStatus;

/// Where the conversation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    WakeListening,
    Capturing,
    Processing,
    Speaking,
    PermissionDenied,
    Error,
}

impl ConversationState {
    /// Whether `self -> to` is a legal move
    #[must_use]
    pub const fn can_transition(self, to: Self) -> bool {
        use ConversationState::{
            Capturing, Error, Idle, PermissionDenied, Processing, Speaking, WakeListening,
        };

        match (self, to) {
            (PermissionDenied, PermissionDenied) => false,
            (_, PermissionDenied) => true,
            (Idle, WakeListening | Capturing | Processing)
            | (WakeListening, Idle | Capturing | Processing)
            | (Capturing, Processing | Idle | WakeListening)
            | (Processing, Speaking | Error | Idle | WakeListening | Capturing)
            | (Speaking, Idle | WakeListening | Capturing | Error)
            | (PermissionDenied | Error, Idle) => true,
            _ => false,
        }
    }

    /// Resting states the controller returns to between turns
    #[must_use]
    pub const fn is_resting(self) -> bool {
        matches!(self, Self::Idle | Self::WakeListening)
    }

    /// States that wait for a retry before voice resumes
    #[must_use]
    pub const fn is_blocked(self) -> bool {
        matches!(self, Self::PermissionDenied | Self::Error)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::WakeListening => "wake_listening",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Speaking => "speaking",
            Self::PermissionDenied => "permission_denied",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A state change, broadcast to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: ConversationState,
    pub to: ConversationState,
    pub at: DateTime<Utc>,
}

/// Observable state for the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub state: ConversationState,

    /// Latest recognized text of the capture in progress
    pub interim_transcript: String,

    /// A reply is being spoken
    pub speaking: bool,

    pub permission: PermissionStatus,

    /// False once speech capture turned out to be unsupported
    pub voice_available: bool,

    /// Persistent user-facing notice (e.g. microphone blocked)
    pub notice: Option<String>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            state: ConversationState::Idle,
            interim_transcript: String::new(),
            speaking: false,
            permission: PermissionStatus::Prompt,
            voice_available: true,
            notice: None,
        }
    }
}

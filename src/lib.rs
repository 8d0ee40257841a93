//! Zoul - a hands-free voice conversation pipeline
//!
//! This library provides the core of the Zoul assistant:
//! - Speech capture sessions with an exclusive audio input
//! - A wake-word gate that runs between turns
//! - Completion dispatch with a local fallback responder
//! - Speech synthesis with a local fallback voice, and a gain-enveloped playback engine
//! - The conversation controller tying them together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Dashboard (HTTP status API)               │
//! │   state  │  messages  │  settings  │  commands       │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │             Conversation Controller                  │
//! │   Wake Word  │  Capture  │  Completion  │  Speech   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Platform capabilities                 │
//! │   Microphone  │  Speaker  │  STT/TTS API  │  Voice  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod daemon;
pub mod error;
pub mod history;
pub mod persona;
pub mod style;
pub mod voice;

pub use completion::{CompletionDispatcher, CompletionService};
pub use config::{Config, Settings};
pub use conversation::{ConversationController, ConversationState, ControllerHandle};
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use history::{Message, MessageLog, Role};

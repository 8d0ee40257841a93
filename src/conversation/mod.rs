//! Conversation orchestration
//!
//! [`ConversationController`] is the only writer of [`ConversationState`]; everything else
//! observes it through a [`ControllerHandle`].

mod controller;
mod state;

pub use controller::{
    Command, Components, ControllerHandle, ControllerOptions, ConversationController,
    ERROR_REPLY, PERMISSION_NOTICE, UNSUPPORTED_NOTICE,
};
pub use state::{ConversationState, Snapshot, Transition};

//! Conversation message log
//!
//! Append-only, insertion ordered. Cloning a `MessageLog` shares the same log, so the
//! controller appends while the dashboard reads.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Role name used by chat-style APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A logged message; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Shared message log
#[derive(Debug, Clone, Default)]
pub struct MessageLog {
    inner: Arc<RwLock<Vec<Message>>>,
}

impl MessageLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return a copy of it
    pub fn append(&self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        if let Ok(mut log) = self.inner.write() {
            log.push(message.clone());
        }
        tracing::debug!(role = role.as_str(), id = %message.id, "message appended");
        message
    }

    /// All messages in append order
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// The last `n` messages in append order
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Message> {
        self.inner
            .read()
            .map(|log| log[log.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().map(|log| log.len()).unwrap_or_default()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset the history (dashboard action)
    pub fn clear(&self) {
        if let Ok(mut log) = self.inner.write() {
            log.clear();
        }
        tracing::info!("message history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order_and_content() {
        let log = MessageLog::new();
        let first = log.append(Role::User, "hello");
        log.append(Role::Assistant, "hi there");
        log.append(Role::System, "notice");

        let messages = log.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], first);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "hi there");
        assert_eq!(messages[2].role, Role::System);
    }

    #[test]
    fn test_clones_share_the_log() {
        let log = MessageLog::new();
        let reader = log.clone();
        log.append(Role::User, "one");
        assert_eq!(reader.len(), 1);
    }

    #[test]
    fn test_recent() {
        let log = MessageLog::new();
        for i in 0..5 {
            log.append(Role::User, i.to_string());
        }
        let recent: Vec<_> = log.recent(2).into_iter().map(|m| m.content).collect();
        assert_eq!(recent, vec!["3", "4"]);
        assert_eq!(log.recent(10).len(), 5);
    }

    #[test]
    fn test_ids_unique_and_clear() {
        let log = MessageLog::new();
        let a = log.append(Role::User, "a");
        let b = log.append(Role::User, "a");
        assert_ne!(a.id, b.id);

        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }
}

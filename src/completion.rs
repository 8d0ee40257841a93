//! Reply generation
//!
//! The dispatcher asks a remote completion service when a credential is configured and
//! otherwise (or when the service fails) answers with a canned local reply.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::{CompletionConfig, Settings};
use crate::history::{Message, Role};
use crate::{Error, Result};

/// Fixed instruction sent with every remote request
pub const SYSTEM_INSTRUCTION: &str = "You are Zoul, a voice assistant. Your replies are \
    spoken aloud, so keep them concise and conversational, without markdown or lists.";

/// Number of prior messages sent as context
pub const CONTEXT_MESSAGES: usize = 10;

/// One turn of prior conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextTurn {
    pub role: &'static str,
    pub content: String,
}

/// A request to the completion service
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub instructions: String,
    pub context: Vec<ContextTurn>,
    pub utterance: String,
}

impl CompletionRequest {
    /// Build a request from the log, keeping the trailing user/assistant turns
    #[must_use]
    pub fn new(history: &[Message], utterance: &str) -> Self {
        let turns: Vec<ContextTurn> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ContextTurn {
                role: m.role.as_str(),
                content: m.content.clone(),
            })
            .collect();
        let skip = turns.len().saturating_sub(CONTEXT_MESSAGES);

        Self {
            instructions: SYSTEM_INSTRUCTION.to_string(),
            context: turns.into_iter().skip(skip).collect(),
            utterance: utterance.to_string(),
        }
    }
}

/// Remote completion capability
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Produce a reply for the request
    ///
    /// # Errors
    ///
    /// Returns `Error::RemoteService` on transport failure, non-success status or a
    /// body without reply text
    async fn complete(&self, credential: &SecretString, request: &CompletionRequest)
    -> Result<String>;
}

/// `OpenAI` Responses API client
pub struct OpenAiCompletion {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OpenAiCompletion {
    #[must_use]
    pub fn new(config: &CompletionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiCompletion {
    async fn complete(
        &self,
        credential: &SecretString,
        request: &CompletionRequest,
    ) -> Result<String> {
        #[derive(Serialize)]
        struct InputMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ResponsesRequest<'a> {
            model: &'a str,
            instructions: &'a str,
            input: Vec<InputMessage<'a>>,
        }

        let mut input: Vec<InputMessage<'_>> = request
            .context
            .iter()
            .map(|t| InputMessage {
                role: t.role,
                content: &t.content,
            })
            .collect();
        input.push(InputMessage {
            role: "user",
            content: &request.utterance,
        });

        let body = ResponsesRequest {
            model: &self.model,
            instructions: &request.instructions,
            input,
        };

        tracing::debug!(model = %self.model, context = request.context.len(), "requesting completion");

        let response = self
            .client
            .post(format!("{}/responses", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", credential.expose_secret()),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::RemoteService(format!("completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteService(format!(
                "completion error {status}: {body}"
            )));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::RemoteService(format!("malformed completion body: {e}")))?;

        extract_reply(&data)
            .ok_or_else(|| Error::RemoteService("completion body contained no text".to_string()))
    }
}

/// Pull the reply text out of a Responses API body
///
/// Accepts `output_text`, the `output[].content[]` parts, or a bare `text` field.
#[must_use]
pub fn extract_reply(data: &serde_json::Value) -> Option<String> {
    if let Some(text) = data.get("output_text").and_then(serde_json::Value::as_str) {
        let text = text.trim();
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }

    if let Some(items) = data.get("output").and_then(serde_json::Value::as_array) {
        let parts: Vec<&str> = items
            .iter()
            .filter_map(|item| item.get("content").and_then(serde_json::Value::as_array))
            .flatten()
            .filter_map(|chunk| {
                chunk
                    .as_str()
                    .or_else(|| chunk.get("text").and_then(serde_json::Value::as_str))
                    .or_else(|| chunk.get("content").and_then(serde_json::Value::as_str))
            })
            .collect();
        let joined = parts.join("\n");
        let joined = joined.trim();
        if !joined.is_empty() {
            return Some(joined.to_string());
        }
    }

    data.get("text")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

/// Canned intent recognised by the local responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Status,
    Capability,
    Thanks,
    Other,
}

static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(hello|hi|hey|greetings|good (morning|afternoon|evening))\b")
        .expect("valid regex")
});
static STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(how are you|how's it going|status|are you (there|ok|okay|working))\b")
        .expect("valid regex")
});
static CAPABILITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(what can you do|help|capabilit(y|ies)|who are you)\b").expect("valid regex")
});
static THANKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(thanks|thank you|thx|cheers)\b").expect("valid regex")
});

/// Classify an utterance; thanks wins over greeting ("hey, thanks")
#[must_use]
pub fn classify(utterance: &str) -> Intent {
    let text = utterance.to_lowercase();
    if THANKS.is_match(&text) {
        Intent::Thanks
    } else if CAPABILITY.is_match(&text) {
        Intent::Capability
    } else if STATUS.is_match(&text) {
        Intent::Status
    } else if GREETING.is_match(&text) {
        Intent::Greeting
    } else {
        Intent::Other
    }
}

/// Deterministic reply used without a credential or when the service fails
#[must_use]
pub fn local_reply(utterance: &str, active_personas: usize) -> String {
    match classify(utterance) {
        Intent::Greeting => "Hello! I'm Zoul. How can I help you today?".to_string(),
        Intent::Status => {
            "All systems are running smoothly. I'm ready when you are.".to_string()
        }
        Intent::Capability => "I can answer questions, keep track of our conversation, and \
            speak my replies aloud. Add an API key in settings for richer answers."
            .to_string(),
        Intent::Thanks => "You're welcome! Anything else I can do?".to_string(),
        Intent::Other => match active_personas {
            0 | 1 => "Understood. I'm on it.".to_string(),
            n => format!("Understood. {n} assistant personas are active and standing by."),
        },
    }
}

/// Turns an utterance into a reply
#[derive(Clone)]
pub struct CompletionDispatcher {
    remote: Arc<dyn CompletionService>,
}

impl CompletionDispatcher {
    #[must_use]
    pub fn new(remote: Arc<dyn CompletionService>) -> Self {
        Self { remote }
    }

    /// Reply to `utterance` given the prior `history`
    ///
    /// # Errors
    ///
    /// Returns `Error::InternalState` only if both the remote and local paths produced
    /// an empty reply
    pub async fn reply(
        &self,
        history: &[Message],
        utterance: &str,
        settings: &Settings,
    ) -> Result<String> {
        if let Some(credential) = settings.credential() {
            let request = CompletionRequest::new(history, utterance);
            match self.remote.complete(credential, &request).await {
                Ok(reply) if !reply.trim().is_empty() => return Ok(reply.trim().to_string()),
                Ok(_) => tracing::warn!("completion service returned an empty reply, using local responder"),
                Err(e) => tracing::warn!(error = %e, "completion service failed, using local responder"),
            }
        }

        let reply = local_reply(utterance, settings.active_personas.len());
        if reply.trim().is_empty() {
            return Err(Error::InternalState("local responder produced no reply".to_string()));
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::history::MessageLog;

    struct Scripted {
        reply: Option<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionService for Scripted {
        async fn complete(&self, _: &SecretString, _: &CompletionRequest) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(ToString::to_string)
                .ok_or_else(|| Error::RemoteService("503 Service Unavailable".to_string()))
        }
    }

    fn with_credential() -> Settings {
        Settings {
            credential: Some(SecretString::from("sk-test".to_string())),
            ..Settings::default()
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("Hello there"), Intent::Greeting);
        assert_eq!(classify("HOW ARE YOU"), Intent::Status);
        assert_eq!(classify("what can you do?"), Intent::Capability);
        assert_eq!(classify("thank you so much"), Intent::Thanks);
        assert_eq!(classify("hey, thanks"), Intent::Thanks);
        assert_eq!(classify("this is a test"), Intent::Other);
        assert_eq!(classify("what time is it"), Intent::Other);
    }

    #[test]
    fn test_local_reply_is_case_insensitive() {
        for (a, b) in [("hello", "HELLO"), ("Thanks", "tHaNkS"), ("help", "HELP")] {
            assert_eq!(local_reply(a, 1), local_reply(b, 1));
        }
    }

    #[test]
    fn test_local_reply_mentions_active_personas() {
        let reply = local_reply("open the pod bay doors", 3);
        assert!(reply.contains('3'));
        assert!(!local_reply("open the pod bay doors", 1).is_empty());
    }

    #[test]
    fn test_request_keeps_trailing_context() {
        let log = MessageLog::new();
        log.append(Role::System, "voice unavailable");
        for i in 0..12 {
            log.append(Role::User, format!("q{i}"));
        }
        let request = CompletionRequest::new(&log.messages(), "latest");
        assert_eq!(request.context.len(), CONTEXT_MESSAGES);
        assert_eq!(request.context[0].content, "q2");
        assert!(request.context.iter().all(|t| t.role != "system"));
        assert_eq!(request.utterance, "latest");
    }

    #[test]
    fn test_extract_reply_shapes() {
        let direct = serde_json::json!({ "output_text": "  Hi!  " });
        assert_eq!(extract_reply(&direct).as_deref(), Some("Hi!"));

        let nested = serde_json::json!({
            "output": [
                { "type": "message", "content": [
                    { "type": "output_text", "text": "Part one." },
                    { "type": "output_text", "text": "Part two." }
                ]}
            ]
        });
        assert_eq!(
            extract_reply(&nested).as_deref(),
            Some("Part one.\nPart two.")
        );

        let bare = serde_json::json!({ "text": "plain" });
        assert_eq!(extract_reply(&bare).as_deref(), Some("plain"));

        let empty = serde_json::json!({ "output": [] });
        assert!(extract_reply(&empty).is_none());
    }

    #[tokio::test]
    async fn test_no_credential_skips_remote() {
        let remote = Arc::new(Scripted { reply: Some("remote"), calls: AtomicUsize::new(0) });
        let dispatcher = CompletionDispatcher::new(remote.clone());

        let reply = dispatcher.reply(&[], "hello", &Settings::default()).await.unwrap();
        assert_eq!(reply, local_reply("hello", 1));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_remote_reply_used() {
        let remote = Arc::new(Scripted { reply: Some(" It is noon. "), calls: AtomicUsize::new(0) });
        let dispatcher = CompletionDispatcher::new(remote.clone());

        let reply = dispatcher.reply(&[], "what time is it", &with_credential()).await.unwrap();
        assert_eq!(reply, "It is noon.");
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back() {
        let remote = Arc::new(Scripted { reply: None, calls: AtomicUsize::new(0) });
        let dispatcher = CompletionDispatcher::new(remote.clone());

        let reply = dispatcher.reply(&[], "thanks", &with_credential()).await.unwrap();
        assert_eq!(reply, local_reply("thanks", 1));
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_remote_error() {
        let client = OpenAiCompletion::new(&CompletionConfig {
            model: "test".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
        });
        let request = CompletionRequest::new(&[], "hello");
        let err = client
            .complete(&SecretString::from("sk-test".to_string()), &request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteService(_)));
    }
}

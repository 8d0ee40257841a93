//! Text-to-speech
//!
//! [`SpeechSynthesizer`] prefers remote synthesis played through the envelope engine and
//! falls back to the local system voice whenever the remote path fails.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::local_tts::LocalVoice;
use super::playback::{AudioBuffer, AudioOutput, decode_mp3};
use crate::config::VoiceConfig;
use crate::{Error, Result};

/// Which path produced the speech
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechRoute {
    Remote,
    Local,
}

/// Remote synthesis capability
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Synthesize `text` into encoded audio bytes (MP3)
    ///
    /// # Errors
    ///
    /// `Error::RemoteService` on transport failure or a non-success status
    async fn synthesize(&self, credential: &SecretString, text: &str) -> Result<Vec<u8>>;
}

/// `OpenAI` speech endpoint client
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    model: String,
    voice: String,
    speed: f64,
}

impl OpenAiSpeech {
    #[must_use]
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.tts_model.clone(),
            voice: config.tts_voice.clone(),
            speed: config.tts_speed.clamp(0.25, 4.0),
        }
    }
}

#[async_trait]
impl SynthesisService for OpenAiSpeech {
    async fn synthesize(&self, credential: &SecretString, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct SpeechRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", credential.expose_secret()),
            )
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::RemoteService(format!("speech request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RemoteService(format!("speech error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::RemoteService(format!("speech body failed: {e}")))?;
        Ok(audio.to_vec())
    }
}

/// Speaks replies
#[derive(Clone)]
pub struct SpeechSynthesizer {
    remote: Arc<dyn SynthesisService>,
    output: Arc<dyn AudioOutput>,
    local: Arc<dyn LocalVoice>,
}

impl SpeechSynthesizer {
    #[must_use]
    pub fn new(
        remote: Arc<dyn SynthesisService>,
        output: Arc<dyn AudioOutput>,
        local: Arc<dyn LocalVoice>,
    ) -> Self {
        Self {
            remote,
            output,
            local,
        }
    }

    /// Remote synthesis, decoded
    ///
    /// # Errors
    ///
    /// `Error::RemoteService` from the service, `Error::Decode` for undecodable audio
    pub async fn synthesize(&self, credential: &SecretString, text: &str) -> Result<AudioBuffer> {
        let bytes = self.remote.synthesize(credential, text).await?;
        decode_mp3(&bytes)
    }

    /// Speak `text`, stopping anything already speaking
    ///
    /// With a credential, tries remote synthesis and playback first; any failure there
    /// falls back to the local voice.
    ///
    /// # Errors
    ///
    /// Only when the local voice fails as well
    pub async fn speak(&self, text: &str, credential: Option<&SecretString>) -> Result<SpeechRoute> {
        self.stop().await;

        if let Some(credential) = credential {
            match self.speak_remote(credential, text).await {
                Ok(()) => return Ok(SpeechRoute::Remote),
                Err(e) => tracing::warn!(error = %e, "remote speech failed, using local voice"),
            }
        }

        self.local.speak(text).await?;
        Ok(SpeechRoute::Local)
    }

    async fn speak_remote(&self, credential: &SecretString, text: &str) -> Result<()> {
        let buffer = self.synthesize(credential, text).await?;
        tracing::debug!(duration_ms = buffer.duration().as_millis(), "playing synthesized speech");
        self.output.play(buffer).await
    }

    /// Stop playback and local speech; idempotent
    pub async fn stop(&self) {
        self.output.stop().await;
        self.local.cancel().await;
    }
}

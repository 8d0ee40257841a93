//! Speech-to-text via the Whisper transcription endpoint

use secrecy::{ExposeSecret, SecretString};

use crate::{Error, Result};

/// Response from the transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcribes WAV audio to text
pub struct SpeechToText {
    client: reqwest::Client,
    base_url: String,
    credential: SecretString,
    model: String,
}

impl SpeechToText {
    /// Create a transcriber for the given endpoint
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the credential is blank
    pub fn new(base_url: &str, model: &str, credential: SecretString) -> Result<Self> {
        if credential.expose_secret().trim().is_empty() {
            return Err(Error::Config(
                "an API key is required for transcription".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            model: model.to_string(),
        })
    }

    /// Transcribe one WAV segment
    ///
    /// # Errors
    ///
    /// Returns `Error::Stt` on a non-success status and `Error::Http` on transport failure
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.credential.expose_secret()),
            )
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "transcription request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription error {status}: {body}")));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "failed to parse transcription"))?;

        tracing::debug!(chars = result.text.len(), "transcription complete");
        Ok(result.text)
    }
}

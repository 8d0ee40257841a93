//! Daemon - the main voice service
//!
//! Wires the platform capabilities into a conversation controller, serves the status API
//! and runs until interrupted.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::{ApiServer, ApiState};
use crate::completion::{CompletionDispatcher, OpenAiCompletion};
use crate::config::Settings;
use crate::conversation::{Components, ControllerOptions, ConversationController};
use crate::history::MessageLog;
use crate::voice::{
    AudioPlaybackEngine, DevicePermission, DisabledRecognizer, MicRecognizer,
    MicrophonePermission, OpenAiSpeech, PermissionStatus, SpeechRecognizer, SpeechSynthesizer,
    StaticPermission, SystemVoice,
};
use crate::{Config, Result};

/// The Zoul daemon
pub struct Daemon {
    config: Config,
    settings: Arc<watch::Sender<Settings>>,
    log: MessageLog,
}

impl Daemon {
    /// Create a daemon from loaded configuration
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (settings, _) = watch::channel(config.settings.clone());
        Self {
            config,
            settings: Arc::new(settings),
            log: MessageLog::new(),
        }
    }

    /// Publisher for conversation settings
    #[must_use]
    pub fn settings(&self) -> Arc<watch::Sender<Settings>> {
        Arc::clone(&self.settings)
    }

    /// Shared message log
    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Build the production capability set
    #[must_use]
    pub fn components(&self) -> Components {
        let voice = &self.config.voice;

        let (recognizer, permission): (Arc<dyn SpeechRecognizer>, Arc<dyn MicrophonePermission>) =
            if voice.enabled {
                (
                    Arc::new(MicRecognizer::new(self.settings.subscribe(), voice.clone())),
                    Arc::new(DevicePermission),
                )
            } else {
                (
                    Arc::new(DisabledRecognizer),
                    Arc::new(StaticPermission(PermissionStatus::Granted)),
                )
            };

        let local = SystemVoice::new();
        if !local.is_available() {
            tracing::warn!("no local speech synthesizer found; replies need a credential to be spoken");
        }

        Components {
            recognizer,
            permission,
            dispatcher: CompletionDispatcher::new(Arc::new(OpenAiCompletion::new(
                &self.config.completion,
            ))),
            synthesizer: SpeechSynthesizer::new(
                Arc::new(OpenAiSpeech::new(voice)),
                Arc::new(AudioPlaybackEngine::new()),
                Arc::new(local),
            ),
        }
    }

    /// Run until Ctrl-C
    ///
    /// # Errors
    ///
    /// Returns error if the controller cannot be built
    pub async fn run(self) -> Result<()> {
        let options = ControllerOptions::from_voice(&self.config.voice);
        let (controller, handle) = ConversationController::new(
            self.components(),
            options,
            self.settings.subscribe(),
            self.log.clone(),
        )?;

        let api = if self.config.api_server.enabled {
            let state = ApiState {
                controller: handle.clone(),
                settings: self.settings(),
                voice_enabled: self.config.voice.enabled,
            };
            Some(ApiServer::new(state, self.config.api_server.port).spawn())
        } else {
            tracing::info!("status API disabled");
            None
        };

        let mut controller_task = tokio::spawn(controller.run());

        tracing::info!(
            voice = self.config.voice.enabled,
            wake_phrase = %self.config.voice.wake_phrase,
            "daemon running"
        );

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "failed to listen for shutdown signal");
                }
                tracing::info!("shutdown requested");
                if handle.shutdown().await.is_ok() {
                    let _ = (&mut controller_task).await;
                }
            }
            res = &mut controller_task => {
                if let Err(e) = res {
                    tracing::error!(error = %e, "conversation controller panicked");
                }
            }
        }

        if let Some(api) = api {
            api.abort();
        }
        tracing::info!("daemon stopped");
        Ok(())
    }
}

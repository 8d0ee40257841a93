//! Settings, persona and style endpoints
//!
//! The dashboard edits the conversation settings here; every change is published to the
//! controller through the shared `watch` sender.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::config::Settings;
use crate::persona::{self, Persona};
use crate::style::{self, StylePreset};

/// Settings as shown to the dashboard; the credential is never echoed
#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub wake_word_enabled: bool,
    pub continuous_capture_enabled: bool,
    pub has_credential: bool,
    pub voice_sensitivity: u8,
    pub active_personas: Vec<String>,
}

impl From<&Settings> for SettingsView {
    fn from(settings: &Settings) -> Self {
        Self {
            wake_word_enabled: settings.wake_word_enabled,
            continuous_capture_enabled: settings.continuous_capture_enabled,
            has_credential: settings.has_credential(),
            voice_sensitivity: settings.voice_sensitivity,
            active_personas: settings.active_personas.clone(),
        }
    }
}

/// Partial settings update
#[derive(Debug, Default, Deserialize)]
pub struct SettingsPatch {
    pub wake_word_enabled: Option<bool>,
    pub continuous_capture_enabled: Option<bool>,
    /// An empty string clears the credential
    pub api_key: Option<String>,
    pub voice_sensitivity: Option<u8>,
    pub active_personas: Option<Vec<String>>,
}

impl SettingsPatch {
    /// Apply the patch in place
    pub fn apply(self, settings: &mut Settings) {
        if let Some(v) = self.wake_word_enabled {
            settings.wake_word_enabled = v;
        }
        if let Some(v) = self.continuous_capture_enabled {
            settings.continuous_capture_enabled = v;
        }
        if let Some(key) = self.api_key {
            let key = key.trim();
            settings.credential = if key.is_empty() {
                None
            } else {
                Some(SecretString::from(key.to_string()))
            };
        }
        if let Some(v) = self.voice_sensitivity {
            settings.set_voice_sensitivity(v);
        }
        if let Some(ids) = self.active_personas {
            // Keep only known personas, normalized to their canonical ids
            settings.active_personas = persona::resolve(&ids)
                .into_iter()
                .map(|p| p.id.to_string())
                .collect();
        }
    }
}

async fn get_settings(State(state): State<Arc<ApiState>>) -> Json<SettingsView> {
    Json(SettingsView::from(&*state.settings.borrow()))
}

async fn patch_settings(
    State(state): State<Arc<ApiState>>,
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SettingsView>, ApiError> {
    if patch.voice_sensitivity.is_some_and(|v| v > 100) {
        return Err(ApiError::BadRequest("voice_sensitivity must be between 0 and 100"));
    }

    state.settings.send_modify(|settings| patch.apply(settings));
    let view = SettingsView::from(&*state.settings.borrow());
    tracing::info!(
        wake_word = view.wake_word_enabled,
        continuous = view.continuous_capture_enabled,
        personas = view.active_personas.len(),
        "settings updated"
    );
    Ok(Json(view))
}

/// A roster entry with its activation flag
#[derive(Debug, Serialize)]
pub struct PersonaEntry {
    #[serde(flatten)]
    pub persona: Persona,
    pub active: bool,
}

async fn list_personas(State(state): State<Arc<ApiState>>) -> Json<Vec<PersonaEntry>> {
    let settings = state.settings.borrow();
    let active = persona::resolve(&settings.active_personas);
    let entries = persona::roster()
        .iter()
        .map(|p| PersonaEntry {
            persona: *p,
            active: active.iter().any(|a| a.id == p.id),
        })
        .collect();
    Json(entries)
}

async fn current_style(State(state): State<Arc<ApiState>>) -> Json<StylePreset> {
    let active = persona::resolve(&state.settings.borrow().active_personas);
    Json(style::preset_for(&active))
}

/// Build the settings router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route("/api/personas", get(list_personas))
        .route("/api/style", get(current_style))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_applies_only_given_fields() {
        let mut settings = Settings::default();
        let patch: SettingsPatch =
            serde_json::from_str(r#"{"continuous_capture_enabled":true,"api_key":"sk-1"}"#)
                .unwrap();
        patch.apply(&mut settings);

        assert!(settings.wake_word_enabled);
        assert!(settings.continuous_capture_enabled);
        assert!(settings.has_credential());
    }

    #[test]
    fn test_empty_key_clears_credential() {
        let mut settings = Settings {
            credential: Some(SecretString::from("sk-1".to_string())),
            ..Settings::default()
        };
        SettingsPatch {
            api_key: Some("  ".to_string()),
            ..SettingsPatch::default()
        }
        .apply(&mut settings);
        assert!(settings.credential.is_none());
    }

    #[test]
    fn test_personas_are_normalized() {
        let mut settings = Settings::default();
        SettingsPatch {
            active_personas: Some(vec!["Aegis".into(), "ghost".into(), "aegis".into()]),
            ..SettingsPatch::default()
        }
        .apply(&mut settings);
        assert_eq!(settings.active_personas, vec!["aegis".to_string()]);
    }

    #[test]
    fn test_view_hides_credential() {
        let settings = Settings {
            credential: Some(SecretString::from("sk-secret".to_string())),
            ..Settings::default()
        };
        let json = serde_json::to_string(&SettingsView::from(&settings)).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(json.contains("\"has_credential\":true"));
    }
}

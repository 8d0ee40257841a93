//! Presentation style derived from the active personas
//!
//! The pipeline holds no styling state. A renderer asks for the preset that matches the
//! current persona selection and applies it however it likes.

use serde::Serialize;

use crate::persona::{self, Persona};

/// Default accent colour
const DEFAULT_ACCENT: &str = "#8a5cff";

/// Default glow colour
const DEFAULT_GLOW: &str = "#5e39ff";

/// Visual parameters for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StylePreset {
    /// Accent colour (hex)
    pub accent: String,

    /// Glow colour (hex)
    pub glow: String,

    /// CSS filter applied to the page
    pub filter: &'static str,

    /// Panel opacity (0.0-1.0)
    pub panel_opacity: f32,

    /// Background blur in pixels
    pub blur_px: u8,

    /// Pulse animation (all personas active)
    pub pulse: bool,
}

impl Default for StylePreset {
    fn default() -> Self {
        Self {
            accent: DEFAULT_ACCENT.to_string(),
            glow: DEFAULT_GLOW.to_string(),
            filter: "none",
            panel_opacity: 1.0,
            blur_px: 0,
            pulse: false,
        }
    }
}

/// Compute the preset for a set of active personas; the first one is primary
#[must_use]
pub fn preset_for(active: &[&Persona]) -> StylePreset {
    let Some(primary) = active.first() else {
        return StylePreset::default();
    };

    let mut preset = StylePreset::default();
    let color = primary.color.to_string();

    match primary.id {
        "veil" => {
            preset.panel_opacity = 0.85;
            preset.blur_px = 10;
            preset.filter = "contrast(0.95) brightness(0.9)";
        }
        "nythera" => {
            preset.accent = color;
            preset.filter = "saturate(1.2) brightness(1.05)";
        }
        "chronos" => preset.accent = color,
        "aegis" | "oracle" => {
            preset.accent.clone_from(&color);
            preset.glow = color;
        }
        "lumina" => {
            preset.accent = color;
            preset.filter = "brightness(1.1)";
        }
        "phantom" => preset.filter = "contrast(1.1) brightness(0.85)",
        _ => preset.accent = color,
    }

    if persona::all_active(active) {
        preset.filter = "saturate(1.3) contrast(1.1) brightness(1.05)";
        preset.accent = DEFAULT_ACCENT.to_string();
        preset.glow = "#ff00ff".to_string();
        preset.pulse = true;
    }

    preset
}

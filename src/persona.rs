//! Assistant personas
//!
//! The dashboard lets the user switch on any subset of twelve assistant personas. The
//! voice pipeline only needs to know which are active: the local responder mentions how
//! many are standing by, and the presentation layer derives a style preset from them.

use serde::Serialize;

/// Persona that is active when nothing else is configured
pub const DEFAULT_PERSONA_ID: &str = "zoul";

/// An assistant persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Persona {
    /// Unique identifier
    pub id: &'static str,

    /// Display name
    pub name: &'static str,

    /// Short description of the persona's focus
    pub description: &'static str,

    /// Accent colour (hex)
    pub color: &'static str,
}

const ROSTER: [Persona; 12] = [
    Persona { id: "zoul", name: "Zoul", description: "Core AI Assistant", color: "#8a5cff" },
    Persona { id: "veil", name: "Veil", description: "Stealth & Privacy Mode", color: "#1a1f28" },
    Persona { id: "nythera", name: "Nythera", description: "Creative Generation", color: "#ff6b9d" },
    Persona { id: "abyzor", name: "Abyzor", description: "Destructive Analysis", color: "#ff4757" },
    Persona { id: "voltrix", name: "Voltrix", description: "Balance & Harmony", color: "#ffa502" },
    Persona { id: "verse", name: "Verse", description: "Life & Growth", color: "#2ed573" },
    Persona { id: "nexus", name: "Nexus", description: "Connection Hub", color: "#1e90ff" },
    Persona { id: "chronos", name: "Chronos", description: "Time & Planning", color: "#9b59b6" },
    Persona { id: "aegis", name: "Aegis", description: "Protection & Security", color: "#3498db" },
    Persona { id: "lumina", name: "Lumina", description: "Knowledge & Insight", color: "#f1c40f" },
    Persona { id: "phantom", name: "Phantom", description: "Shadow Operations", color: "#2c3e50" },
    Persona { id: "oracle", name: "Oracle", description: "Prediction & Foresight", color: "#e67e22" },
];

/// All known personas, in roster order
#[must_use]
pub const fn roster() -> &'static [Persona] {
    &ROSTER
}

/// Look up a persona by id (case-insensitive)
#[must_use]
pub fn find(id: &str) -> Option<&'static Persona> {
    let id = id.trim();
    ROSTER.iter().find(|p| p.id.eq_ignore_ascii_case(id))
}

/// Resolve persona ids, keeping the given order and skipping unknown or repeated ids
#[must_use]
pub fn resolve<S: AsRef<str>>(ids: &[S]) -> Vec<&'static Persona> {
    let mut resolved: Vec<&'static Persona> = Vec::with_capacity(ids.len());
    for id in ids {
        match find(id.as_ref()) {
            Some(p) if !resolved.iter().any(|r| r.id == p.id) => resolved.push(p),
            Some(_) => {}
            None => tracing::debug!(id = id.as_ref(), "ignoring unknown persona"),
        }
    }
    resolved
}

/// Whether every persona in the roster is active
#[must_use]
pub fn all_active(active: &[&Persona]) -> bool {
    active.len() >= ROSTER.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_ids_unique() {
        let mut ids: Vec<_> = roster().iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 12);
    }

    #[test]
    fn test_resolve_keeps_order_and_skips_unknown() {
        let active = resolve(&["Lumina", "nobody", "zoul", "lumina"]);
        let ids: Vec<_> = active.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["lumina", "zoul"]);
    }

    #[test]
    fn test_all_active() {
        let every: Vec<_> = roster().iter().map(|p| p.id).collect();
        assert!(all_active(&resolve(&every)));
        assert!(!all_active(&resolve(&["zoul"])));
    }
}

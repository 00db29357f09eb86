//! Built-in character personas.
//!
//! Character identity is a validated lookup, not free-form dispatch:
//! `CharacterConfig::by_id` returning `None` is what rejects an unknown
//! `character:<id>` role before any model call is made.

use serde::{Deserialize, Serialize};

/// Persona configuration for a character-role agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterConfig {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub system_prompt: String,
}

impl CharacterConfig {
    pub fn skeptic() -> Self {
        Self {
            id: "skeptic".to_string(),
            name: "The Skeptic".to_string(),
            description: Some("Challenges evidence sufficiency and pushes back on weak conclusions".to_string()),
            system_prompt: SKEPTIC_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn mentor() -> Self {
        Self {
            id: "mentor".to_string(),
            name: "The Mentor".to_string(),
            description: Some("Explains audit methodology and coaches junior staff".to_string()),
            system_prompt: MENTOR_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn regulator() -> Self {
        Self {
            id: "regulator".to_string(),
            name: "The Regulator".to_string(),
            description: Some("Reads workpapers the way an inspection team would".to_string()),
            system_prompt: REGULATOR_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Get a character by ID. `None` means the id is unknown and the
    /// request must be rejected.
    pub fn by_id(id: &str) -> Option<Self> {
        match id.to_lowercase().as_str() {
            "skeptic" => Some(Self::skeptic()),
            "mentor" => Some(Self::mentor()),
            "regulator" => Some(Self::regulator()),
            _ => None,
        }
    }

    pub fn all() -> Vec<Self> {
        vec![Self::skeptic(), Self::mentor(), Self::regulator()]
    }
}

const SKEPTIC_SYSTEM_PROMPT: &str = "You are a skeptical senior auditor reviewing a colleague's work. \
Question whether the evidence actually supports each conclusion. Point out untested assumptions, \
sampling gaps, and places where management's explanation was accepted without corroboration. \
Be direct but professional.";

const MENTOR_SYSTEM_PROMPT: &str = "You are an experienced audit mentor coaching junior staff. \
Explain the purpose behind each procedure, what good evidence looks like, and common pitfalls. \
Prefer teaching over doing the work for them.";

const REGULATOR_SYSTEM_PROMPT: &str = "You are a regulatory inspector reviewing audit workpapers. \
Assess whether the documentation would stand on its own to an outside reader: is the work performed, \
the evidence obtained, and the conclusion reached all traceable? Flag documentation that asserts \
rather than demonstrates.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_by_id_known_and_unknown() {
        assert!(CharacterConfig::by_id("skeptic").is_some());
        assert!(CharacterConfig::by_id("SKEPTIC").is_some());
        assert!(CharacterConfig::by_id("ghost").is_none());
    }

    #[test]
    fn test_catalog_ids_are_resolvable() {
        for character in CharacterConfig::all() {
            assert!(CharacterConfig::by_id(&character.id).is_some());
        }
    }
}

//! Inbound chat request model.
//!
//! Schema validation beyond shape (auth, rate limiting) happens upstream;
//! the limits enforced here are the ones the agent layer depends on.

use serde::{Deserialize, Serialize};

use crate::error::ServerError;

pub const MAX_ATTACHMENTS: usize = 5;
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_HISTORY_TURNS: usize = 100;

/// A request to stream a response from an agent variant.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub model: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
    /// Declared agent role: "copilot" (default orchestrator), "judge",
    /// or "character:<id>".
    pub agent_id: String,
    #[serde(default)]
    pub canvas_mode: bool,
    #[serde(default)]
    pub run_mode: Option<RunMode>,
}

/// An uploaded file reference passed along as prompt context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub media_type: String,
    pub size_bytes: usize,
    /// Inline content (text extraction happens upstream).
    #[serde(default)]
    pub content: Option<String>,
}

/// One prior conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

/// "Run this workflow" parameters on a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMode {
    pub workflow_id: String,
    #[serde(default)]
    pub workflow_slug: Option<String>,
    /// When set, the agent commits each draft as completed itself and keeps
    /// going until the frontier empties, instead of stopping for review.
    #[serde(default)]
    pub auto_advance: bool,
}

impl ChatRequest {
    /// Reject malformed requests before any resource is touched.
    pub fn validate(&self) -> Result<(), ServerError> {
        let has_message = self.message.as_deref().is_some_and(|m| !m.trim().is_empty());
        if !has_message && self.attachments.is_empty() {
            return Err(ServerError::BadRequest(
                "Either a message or at least one attachment is required".to_string(),
            ));
        }
        if self.attachments.len() > MAX_ATTACHMENTS {
            return Err(ServerError::BadRequest(format!(
                "Too many attachments: {} (max {})",
                self.attachments.len(),
                MAX_ATTACHMENTS
            )));
        }
        if let Some(big) = self
            .attachments
            .iter()
            .find(|a| a.size_bytes > MAX_ATTACHMENT_BYTES)
        {
            return Err(ServerError::BadRequest(format!(
                "Attachment '{}' exceeds the 10MB limit",
                big.name
            )));
        }
        if self.history.len() > MAX_HISTORY_TURNS {
            return Err(ServerError::BadRequest(format!(
                "History too long: {} turns (max {})",
                self.history.len(),
                MAX_HISTORY_TURNS
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ServerError::BadRequest("Model is required".to_string()));
        }
        Ok(())
    }
}

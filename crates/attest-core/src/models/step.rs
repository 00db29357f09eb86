//! Step ledger records — per-(user, workflow, node) completion state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ledger entry. Exists at most once per (user, workflow, node) triple;
/// created on first write (upsert semantics, no separate create step).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub user_id: String,
    pub workflow_id: String,
    pub node_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by `StepStore::upsert`. Absent fields keep the
/// stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPatch {
    pub result: Option<String>,
    pub completed: Option<bool>,
}

impl StepPatch {
    pub fn result(text: impl Into<String>) -> Self {
        Self {
            result: Some(text.into()),
            completed: None,
        }
    }

    pub fn approve(text: impl Into<String>) -> Self {
        Self {
            result: Some(text.into()),
            completed: Some(true),
        }
    }

    pub fn completed(completed: bool) -> Self {
        Self {
            result: None,
            completed: Some(completed),
        }
    }
}

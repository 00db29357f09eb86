//! Usage-metering and spending-limit models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One immutable, append-only usage ledger row. Written once per completed
/// agent call; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: String,
    pub user_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// Derived at append time from the per-model rate table.
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn new(
        user_id: impl Into<String>,
        model: impl Into<String>,
        prompt_tokens: u64,
        output_tokens: u64,
        session_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            model: model.into(),
            prompt_tokens,
            output_tokens,
            total_tokens: prompt_tokens + output_tokens,
            estimated_cost: 0.0,
            session_id,
            created_at: Utc::now(),
        }
    }
}

/// Per-user monthly spending cap. Mutated only by an administrative actor;
/// absent rows fall back to the process-wide default limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingLimit {
    pub user_id: String,
    pub monthly_limit: f64,
    pub updated_by: String,
    pub updated_at: DateTime<Utc>,
}

/// Result of a budget authorization check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendCheck {
    pub allowed: bool,
    pub current_spend: f64,
    pub monthly_limit: f64,
    pub remaining: f64,
}

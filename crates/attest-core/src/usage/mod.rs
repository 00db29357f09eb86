//! Usage metering and spend governance.
//!
//! The governor owns the spend ledger exclusively: every agent invocation
//! must pass `check_can_spend` before it starts, and every completed model
//! call appends one immutable `UsageRecord` via `track_usage`.
//!
//! The check-then-spend sequence is not atomic across concurrent requests
//! from one user; overshoot is bounded by the cost of in-flight calls.

use chrono::{Datelike, TimeZone, Utc};

use crate::db::Database;
use crate::error::ServerError;
use crate::models::{SpendCheck, SpendingLimit, UsageRecord};

/// Monthly cap applied to users without an explicit limit row, in USD.
pub const DEFAULT_MONTHLY_LIMIT: f64 = 20.0;

/// Rate row applied when a model is missing from the table.
pub const DEFAULT_RATE_MODEL: &str = "claude-sonnet-4-20250514";

/// Per-model (input, output) USD rates per million tokens.
const MODEL_RATES: &[(&str, f64, f64)] = &[
    ("claude-opus-4-20250514", 15.0, 75.0),
    ("claude-sonnet-4-20250514", 3.0, 15.0),
    ("claude-3-5-haiku-20241022", 0.8, 4.0),
];

fn rates_for(model: &str) -> (f64, f64) {
    MODEL_RATES
        .iter()
        .find(|(name, _, _)| *name == model)
        .or_else(|| MODEL_RATES.iter().find(|(name, _, _)| *name == DEFAULT_RATE_MODEL))
        .map(|(_, input, output)| (*input, *output))
        .unwrap_or((3.0, 15.0))
}

/// Cost of one call under the rate table.
pub fn estimate_cost(model: &str, prompt_tokens: u64, output_tokens: u64) -> f64 {
    let (input_rate, output_rate) = rates_for(model);
    (prompt_tokens as f64 * input_rate + output_tokens as f64 * output_rate) / 1_000_000.0
}

pub struct UsageGovernor {
    db: Database,
}

impl UsageGovernor {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Authorize an agent invocation against the user's monthly budget.
    ///
    /// Sums this calendar month's spend (UTC, from day 1 00:00:00) and
    /// compares it to the user's limit row or the process default. A denial
    /// is terminal and user-visible (HTTP 429), never retried mid-stream.
    pub async fn check_can_spend(&self, user_id: &str) -> Result<SpendCheck, ServerError> {
        let uid = user_id.to_string();
        let month_start = month_start_millis();

        let (current_spend, limit) = self
            .db
            .with_conn_async(move |conn| {
                let spend: f64 = conn.query_row(
                    "SELECT COALESCE(SUM(estimated_cost), 0) FROM usage_records
                     WHERE user_id = ?1 AND created_at >= ?2",
                    rusqlite::params![uid, month_start],
                    |row| row.get(0),
                )?;
                let limit: Option<f64> = conn
                    .query_row(
                        "SELECT monthly_limit FROM spending_limits WHERE user_id = ?1",
                        rusqlite::params![uid],
                        |row| row.get(0),
                    )
                    .map(Some)
                    .or_else(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => Ok(None),
                        other => Err(other),
                    })?;
                Ok((spend, limit))
            })
            .await?;

        let monthly_limit = limit.unwrap_or(DEFAULT_MONTHLY_LIMIT);
        let remaining = (monthly_limit - current_spend).max(0.0);
        Ok(SpendCheck {
            allowed: remaining > 0.0,
            current_spend,
            monthly_limit,
            remaining,
        })
    }

    /// Like `check_can_spend`, but converts a denial into the terminal
    /// budget error used by the agent dispatch path.
    pub async fn authorize(&self, user_id: &str) -> Result<SpendCheck, ServerError> {
        let check = self.check_can_spend(user_id).await?;
        if !check.allowed {
            return Err(ServerError::BudgetExceeded {
                current_spend: check.current_spend,
                monthly_limit: check.monthly_limit,
            });
        }
        Ok(check)
    }

    /// Append one immutable usage row, deriving `estimated_cost` from the
    /// rate table. Fire-and-forget: a persistence failure is logged and
    /// swallowed — it must never fail an already-delivered agent response.
    pub async fn track_usage(&self, mut record: UsageRecord) {
        record.estimated_cost =
            estimate_cost(&record.model, record.prompt_tokens, record.output_tokens);
        record.total_tokens = record.prompt_tokens + record.output_tokens;

        let r = record.clone();
        let result = self
            .db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO usage_records
                       (id, user_id, model, prompt_tokens, output_tokens, total_tokens,
                        estimated_cost, session_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    rusqlite::params![
                        r.id,
                        r.user_id,
                        r.model,
                        r.prompt_tokens as i64,
                        r.output_tokens as i64,
                        r.total_tokens as i64,
                        r.estimated_cost,
                        r.session_id,
                        r.created_at.timestamp_millis(),
                    ],
                )?;
                Ok(())
            })
            .await;

        if let Err(e) = result {
            tracing::warn!(
                user_id = %record.user_id,
                model = %record.model,
                "Failed to persist usage record: {}",
                e
            );
        }
    }

    /// Set a user's monthly cap. Administrative only — callers gate on the
    /// requester's `is_admin` flag before reaching this.
    pub async fn set_limit(
        &self,
        user_id: &str,
        monthly_limit: f64,
        updated_by: &str,
    ) -> Result<SpendingLimit, ServerError> {
        if monthly_limit < 0.0 {
            return Err(ServerError::BadRequest(
                "Monthly limit must be non-negative".to_string(),
            ));
        }
        let uid = user_id.to_string();
        let by = updated_by.to_string();
        let now = Utc::now();
        let now_ms = now.timestamp_millis();

        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO spending_limits (user_id, monthly_limit, updated_by, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(user_id) DO UPDATE SET
                       monthly_limit = excluded.monthly_limit,
                       updated_by = excluded.updated_by,
                       updated_at = excluded.updated_at",
                    rusqlite::params![uid, monthly_limit, by, now_ms],
                )?;
                Ok(())
            })
            .await?;

        Ok(SpendingLimit {
            user_id: user_id.to_string(),
            monthly_limit,
            updated_by: updated_by.to_string(),
            updated_at: now,
        })
    }

    pub async fn get_all_limits(&self) -> Result<Vec<SpendingLimit>, ServerError> {
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT user_id, monthly_limit, updated_by, updated_at
                     FROM spending_limits ORDER BY user_id ASC",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let updated_ms: i64 = row.get(3)?;
                        Ok(SpendingLimit {
                            user_id: row.get(0)?,
                            monthly_limit: row.get(1)?,
                            updated_by: row.get(2)?,
                            updated_at: chrono::DateTime::from_timestamp_millis(updated_ms)
                                .unwrap_or_else(Utc::now),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }
}

/// Millisecond timestamp of the first instant of the current UTC month.
fn month_start_millis() -> i64 {
    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn governor() -> UsageGovernor {
        UsageGovernor::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_estimate_cost_known_model() {
        // 1M prompt tokens at $3 + 1M output tokens at $15
        let cost = estimate_cost("claude-sonnet-4-20250514", 1_000_000, 1_000_000);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_estimate_cost_unknown_model_uses_default_rates() {
        let unknown = estimate_cost("some-new-model", 500_000, 100_000);
        let default = estimate_cost(DEFAULT_RATE_MODEL, 500_000, 100_000);
        assert!((unknown - default).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_spend_check_against_limit() {
        let gov = governor();
        gov.set_limit("u1", 5.0, "admin").await.unwrap();

        // 4.99 of spend: one record of 1_663_333 prompt tokens at $3/MTok ≈ 4.99.
        let mut record = UsageRecord::new("u1", "claude-sonnet-4-20250514", 1_663_333, 0, None);
        record.created_at = Utc::now();
        gov.track_usage(record).await;

        let check = gov.check_can_spend("u1").await.unwrap();
        assert!(check.allowed);
        assert!((check.current_spend - 4.99).abs() < 0.01);
        assert!(check.remaining > 0.0 && check.remaining < 0.02);

        // Push spend to the cap: no longer allowed, remaining clamps to 0.
        gov.track_usage(UsageRecord::new("u1", "claude-sonnet-4-20250514", 1_000_000, 0, None))
            .await;
        let check = gov.check_can_spend("u1").await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.remaining, 0.0);
    }

    #[tokio::test]
    async fn test_default_limit_when_no_row() {
        let gov = governor();
        let check = gov.check_can_spend("nobody").await.unwrap();
        assert!(check.allowed);
        assert_eq!(check.monthly_limit, DEFAULT_MONTHLY_LIMIT);
        assert_eq!(check.current_spend, 0.0);
    }

    #[tokio::test]
    async fn test_authorize_denial_is_budget_error() {
        let gov = governor();
        gov.set_limit("u1", 0.0, "admin").await.unwrap();
        let err = gov.authorize("u1").await.unwrap_err();
        assert!(matches!(err, ServerError::BudgetExceeded { .. }));
    }

    #[tokio::test]
    async fn test_set_limit_upserts_and_lists() {
        let gov = governor();
        gov.set_limit("u1", 5.0, "admin").await.unwrap();
        gov.set_limit("u1", 10.0, "admin2").await.unwrap();
        gov.set_limit("u2", 2.5, "admin").await.unwrap();

        let limits = gov.get_all_limits().await.unwrap();
        assert_eq!(limits.len(), 2);
        assert_eq!(limits[0].user_id, "u1");
        assert_eq!(limits[0].monthly_limit, 10.0);
        assert_eq!(limits[0].updated_by, "admin2");
    }
}

//! `attest limit` / `attest usage` — Spend governance commands.

use attest_core::state::AppState;

use super::print_json;

pub async fn list(state: &AppState) -> Result<(), String> {
    let limits = state
        .usage_governor
        .get_all_limits()
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "limits": limits }));
    Ok(())
}

pub async fn set(state: &AppState, user_id: &str, monthly_limit: f64) -> Result<(), String> {
    let limit = state
        .usage_governor
        .set_limit(user_id, monthly_limit, "cli")
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "limit": limit }));
    Ok(())
}

pub async fn usage(state: &AppState, user_id: &str) -> Result<(), String> {
    let check = state
        .usage_governor
        .check_can_spend(user_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "usage": check }));
    Ok(())
}

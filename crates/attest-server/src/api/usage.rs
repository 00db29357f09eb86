//! Usage & spending-limit API - /api/usage
//!
//! - GET /api/usage                 — the caller's spend check
//! - GET /api/usage/limits          — all limits (admin only)
//! - PUT /api/usage/limits/{userId} — set a user's monthly cap (admin only)

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use attest_core::state::AppState;
use attest_core::ServerError;

use super::{identity, Identity};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_spend))
        .route("/limits", get(get_limits))
        .route("/limits/{user_id}", put(set_limit))
}

fn require_admin(caller: &Identity) -> Result<(), ServerError> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(ServerError::Forbidden(
            "Administrator access required".to_string(),
        ))
    }
}

async fn get_spend(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    let check = state.usage_governor.check_can_spend(&caller.user_id).await?;
    Ok(Json(serde_json::json!({ "usage": check })))
}

async fn get_limits(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    require_admin(&caller)?;
    let limits = state.usage_governor.get_all_limits().await?;
    Ok(Json(serde_json::json!({ "limits": limits })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetLimitRequest {
    monthly_limit: f64,
}

async fn set_limit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    Json(body): Json<SetLimitRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    require_admin(&caller)?;
    let limit = state
        .usage_governor
        .set_limit(&user_id, body.monthly_limit, &caller.user_id)
        .await?;
    Ok(Json(serde_json::json!({ "limit": limit })))
}

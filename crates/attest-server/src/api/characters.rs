//! Character catalog API - /api/characters
//!
//! GET /api/characters — list the built-in personas a request may name via
//! the `character:<id>` role.

use axum::{routing::get, Json, Router};

use attest_core::agent::CharacterConfig;
use attest_core::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_characters))
}

async fn list_characters() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "characters": CharacterConfig::all() }))
}

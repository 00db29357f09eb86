pub mod chat;
pub mod characters;
pub mod usage;
pub mod workflows;

use axum::http::HeaderMap;
use axum::Router;

use attest_core::state::AppState;

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/chat", chat::router())
        .nest("/api/characters", characters::router())
        .nest("/api/usage", usage::router())
        .nest("/api/workflows", workflows::router())
}

/// Caller identity resolved by the authentication collaborator upstream and
/// forwarded as headers. Absent headers mean the anonymous default user.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub is_admin: bool,
}

pub fn identity(headers: &HeaderMap) -> Identity {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or("default")
        .to_string();
    let is_admin = headers
        .get("x-is-admin")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    Identity { user_id, is_admin }
}

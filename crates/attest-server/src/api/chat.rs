//! Chat API - /api/chat
//!
//! POST /api/chat — stream an agent response as newline-delimited JSON.
//!
//! Order of operations is load-bearing: request validation and role
//! resolution reject before any resource is touched, the budget check
//! happens-before the variant is constructed, and only then does streaming
//! begin. A model failure after that point is carried inside the stream as
//! an `error` event — the HTTP status is already committed.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap},
    response::Response,
    routing::post,
    Json, Router,
};
use tokio_stream::StreamExt as _;

use attest_core::agent::{dispatch, AgentContext, AgentRole, StreamEvent};
use attest_core::models::ChatRequest;
use attest_core::state::AppState;
use attest_core::ServerError;

use super::identity;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(chat))
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ServerError> {
    let caller = identity(&headers);

    request.validate()?;
    let role = AgentRole::parse(&request.agent_id)?;

    // Budget authorization happens-before the agent is allowed to start.
    // A denial is terminal (429), never a mid-stream throttle.
    let check = state.usage_governor.authorize(&caller.user_id).await?;
    tracing::debug!(
        user_id = %caller.user_id,
        remaining = check.remaining,
        "Agent invocation authorized"
    );

    let ctx = AgentContext::new(&caller.user_id, state.db.clone(), state.model.clone());
    let agent = dispatch(role, ctx);

    let body = Body::from_stream(
        agent
            .stream_message(request)
            .map(|event| Ok::<_, std::convert::Infallible>(encode_event(&event))),
    );

    Response::builder()
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|e| ServerError::Internal(format!("Failed to build response: {}", e)))
}

/// One event per line, ending with the `done` sentinel the agent emits.
fn encode_event(event: &StreamEvent) -> String {
    let json = serde_json::to_string(event).unwrap_or_else(|e| {
        tracing::error!("Failed to encode stream event: {}", e);
        r#"{"type":"error","message":"event encoding failed"}"#.to_string()
    });
    format!("{}\n", json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::agent::NodeStatus;

    #[test]
    fn test_encode_event_is_one_line() {
        let line = encode_event(&StreamEvent::review("plan", "multi\nline\ndraft"));
        assert!(line.ends_with('\n'));
        // Embedded newlines are escaped, so the record stays one line.
        assert_eq!(line.trim_end().lines().count(), 1);

        let parsed: StreamEvent = serde_json::from_str(line.trim_end()).unwrap();
        assert!(matches!(
            parsed,
            StreamEvent::StepStatus {
                status: NodeStatus::Review,
                ..
            }
        ));
    }
}

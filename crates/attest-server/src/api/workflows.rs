//! Workflow API - /api/workflows
//!
//! CRUD over stored workflows plus the scheduling and step-ledger surfaces:
//! - GET    /api/workflows                     — list the caller's workflows
//! - POST   /api/workflows                     — create a workflow
//! - GET    /api/workflows/{id}                — fetch one workflow
//! - DELETE /api/workflows/{id}                — delete (ledger cascades)
//! - GET    /api/workflows/{id}/order          — order, groups, cycles, frontier
//! - GET    /api/workflows/{id}/steps          — ledger entries + progress
//! - PUT    /api/workflows/{id}/steps/{nodeId} — save/approve one step

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use attest_core::graph::Edge;
use attest_core::models::{StepNode, StepPatch, Workflow};
use attest_core::state::AppState;
use attest_core::store::StepStore;
use attest_core::ServerError;

use super::identity;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows).post(create_workflow))
        .route("/{id}", get(get_workflow).delete(delete_workflow))
        .route("/{id}/order", get(get_order))
        .route("/{id}/steps", get(list_steps))
        .route("/{id}/steps/{node_id}", put(upsert_step))
}

async fn fetch_workflow(
    state: &AppState,
    workflow_id: &str,
    user_id: &str,
) -> Result<Workflow, ServerError> {
    state
        .workflow_store
        .get(workflow_id, user_id)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("Workflow {} not found", workflow_id)))
}

async fn list_workflows(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    let workflows = state.workflow_store.list_for_user(&caller.user_id).await?;
    Ok(Json(serde_json::json!({ "workflows": workflows })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkflowRequest {
    name: String,
    slug: Option<String>,
    description: Option<String>,
    #[serde(default)]
    nodes: Vec<StepNode>,
    #[serde(default)]
    edges: Vec<Edge>,
}

async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateWorkflowRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    if body.name.trim().is_empty() {
        return Err(ServerError::BadRequest("Workflow name is required".to_string()));
    }

    let slug = body.slug.unwrap_or_else(|| slugify(&body.name));
    let mut workflow = Workflow::new(&caller.user_id, body.name, slug);
    workflow.description = body.description;
    workflow.nodes = body.nodes;
    workflow.edges = body.edges;

    state.workflow_store.save(&workflow).await?;
    Ok(Json(serde_json::json!({ "workflow": workflow })))
}

async fn get_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ServerError> {
    let caller = identity(&headers);
    fetch_workflow(&state, &id, &caller.user_id).await.map(Json)
}

async fn delete_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    // Ensure it exists and belongs to the caller before deleting.
    fetch_workflow(&state, &id, &caller.user_id).await?;
    state.workflow_store.delete(&id, &caller.user_id).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// Scheduling view: execution order, parallel groups, cycle diagnostics,
/// and the caller's current frontier. Rebuilt from the stored node/edge
/// lists on every call.
async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    let workflow = fetch_workflow(&state, &id, &caller.user_id).await?;

    let completed = state.step_store.completed_set(&caller.user_id, &workflow.id).await?;
    let graph = workflow.graph();
    let (topo, frontier) = graph.schedule(&completed);

    let node_ids = workflow.node_ids();
    let omitted: Vec<&String> = topo.omitted(&node_ids);

    Ok(Json(serde_json::json!({
        "order": topo.order,
        "parallelGroups": topo.parallel_groups,
        "hasCycles": topo.has_cycles,
        "omitted": omitted,
        "nextAvailableSteps": frontier,
    })))
}

async fn list_steps(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    let workflow = fetch_workflow(&state, &id, &caller.user_id).await?;

    let steps = state
        .step_store
        .list_for_workflow(&caller.user_id, &workflow.id)
        .await?;
    let completed_count = steps.iter().filter(|s| s.completed).count();
    let progress = StepStore::progress(completed_count, workflow.nodes.len());

    Ok(Json(serde_json::json!({
        "steps": steps,
        "progress": progress,
    })))
}

/// Save or approve one step. This is the human side of the completion state
/// machine; a persistence failure here surfaces as a failed approval so the
/// caller knows their approval did not stick.
async fn upsert_step(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, node_id)): Path<(String, String)>,
    Json(patch): Json<StepPatch>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let caller = identity(&headers);
    let workflow = fetch_workflow(&state, &id, &caller.user_id).await?;

    if workflow.node(&node_id).is_none() {
        return Err(ServerError::BadRequest(format!(
            "Step '{}' is not part of workflow '{}'",
            node_id, workflow.name
        )));
    }

    let record = state
        .step_store
        .upsert(&caller.user_id, &workflow.id, &node_id, patch)
        .await?;
    Ok(Json(serde_json::json!({ "step": record })))
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Revenue Audit 2026"), "revenue-audit-2026");
        assert_eq!(slugify("  Q3 / Cash & Banks  "), "q3-cash-banks");
    }
}

//! `attest workflow` — Workflow inspection commands.

use attest_core::state::AppState;
use attest_core::store::StepStore;

use super::print_json;

pub async fn list(state: &AppState, user_id: &str) -> Result<(), String> {
    let workflows = state
        .workflow_store
        .list_for_user(user_id)
        .await
        .map_err(|e| e.to_string())?;
    print_json(&serde_json::json!({ "workflows": workflows }));
    Ok(())
}

pub async fn show(state: &AppState, id: &str, user_id: &str) -> Result<(), String> {
    let workflow = state
        .workflow_store
        .get(id, user_id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Workflow {} not found", id))?;

    let completed = state
        .step_store
        .completed_set(user_id, &workflow.id)
        .await
        .map_err(|e| e.to_string())?;
    let graph = workflow.graph();
    let (topo, frontier) = graph.schedule(&completed);

    let steps = state
        .step_store
        .list_for_workflow(user_id, &workflow.id)
        .await
        .map_err(|e| e.to_string())?;
    let completed_count = steps.iter().filter(|s| s.completed).count();
    let progress = StepStore::progress(completed_count, workflow.nodes.len());

    print_json(&serde_json::json!({
        "workflow": workflow,
        "order": topo.order,
        "parallelGroups": topo.parallel_groups,
        "hasCycles": topo.has_cycles,
        "nextAvailableSteps": frontier,
        "steps": steps,
        "progress": progress,
    }));
    Ok(())
}

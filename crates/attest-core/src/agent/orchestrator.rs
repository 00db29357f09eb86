//! Workflow-run orchestration for the copilot variant.
//!
//! Per-node state machine: `pending` (implicit) → `executing` → `review`
//! (draft awaiting a human) → `completed` (approval, via the ledger) or
//! `error` (node-terminal, siblings continue). A run ends when the frontier
//! is empty; the final summary distinguishes "everything completed" from
//! "drafts awaiting review" from "blocked by an errored or cyclic upstream".
//!
//! In normal mode one pass drafts the current frontier and stops — approval
//! is human-paced and happens through the step endpoints. With
//! `autoAdvance` the agent commits each draft itself and keeps unlocking
//! successors until nothing is left.

use std::collections::HashSet;

use tokio::sync::mpsc;

use super::{emit, prompt_with_attachments, track_usage, AgentContext};
use crate::error::ServerError;
use crate::graph::TopologicalOrder;
use crate::models::{ChatRequest, StepPatch, StepRecord, Workflow};
use crate::agent::events::{NodeStatus, StreamEvent};

const DRAFT_SYSTEM_PROMPT: &str = "You are an audit copilot executing one step of an audit \
procedure workflow. Draft the result for the step you are given: what was performed, what \
evidence was examined, and the conclusion. Write it as workpaper documentation an auditor \
will review, edit, and approve. Do not invent evidence that was not provided.";

pub(super) async fn run_workflow(
    ctx: &AgentContext,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ServerError> {
    let run = request
        .run_mode
        .as_ref()
        .ok_or_else(|| ServerError::BadRequest("Run mode parameters missing".to_string()))?;

    let workflow = match ctx.workflows.get(&run.workflow_id, &ctx.user_id).await? {
        Some(w) => w,
        None => match &run.workflow_slug {
            Some(slug) => ctx
                .workflows
                .get_by_slug(slug, &ctx.user_id)
                .await?
                .ok_or_else(|| ServerError::NotFound(format!("Workflow '{}'", run.workflow_id)))?,
            None => {
                return Err(ServerError::NotFound(format!(
                    "Workflow '{}'",
                    run.workflow_id
                )))
            }
        },
    };

    if !emit(
        tx,
        StreamEvent::text(format!(
            "Running workflow \"{}\" ({} steps).",
            workflow.name,
            workflow.nodes.len()
        )),
    )
    .await
    {
        return Ok(());
    }

    // Nodes that failed or were drafted in this run. Both are excluded from
    // further attempts so the loop always makes progress.
    let mut errored: HashSet<String> = HashSet::new();
    let mut drafted: HashSet<String> = HashSet::new();
    let mut topo: TopologicalOrder;

    loop {
        let completed = ctx.steps.completed_set(&ctx.user_id, &workflow.id).await?;

        if !emit(
            tx,
            StreamEvent::ToolCall {
                name: "next_available_steps".to_string(),
                input: serde_json::json!({ "workflowId": &workflow.id }),
            },
        )
        .await
        {
            return Ok(());
        }

        // The graph is rebuilt and the frontier recomputed from scratch on
        // every pass — completion state changes externally between calls.
        let graph = workflow.graph();
        let (current_topo, frontier) = graph.schedule(&completed);
        topo = current_topo;

        if !emit(
            tx,
            StreamEvent::ToolResult {
                name: "next_available_steps".to_string(),
                output: serde_json::json!({
                    "frontier": &frontier,
                    "hasCycles": topo.has_cycles,
                }),
            },
        )
        .await
        {
            return Ok(());
        }

        let actionable: Vec<String> = frontier
            .iter()
            .filter(|n| !errored.contains(*n) && !drafted.contains(*n))
            .cloned()
            .collect();

        if actionable.is_empty() {
            break;
        }

        let prior = ctx.steps.list_for_workflow(&ctx.user_id, &workflow.id).await?;

        for node_id in actionable {
            if !emit(tx, StreamEvent::step(&node_id, NodeStatus::Executing)).await {
                return Ok(());
            }

            let prompt = draft_prompt(&workflow, &node_id, &prior, request);
            match ctx
                .model
                .complete(&request.model, DRAFT_SYSTEM_PROMPT, &[], &prompt)
                .await
            {
                Ok(completion) => {
                    track_usage(ctx, request, &completion).await;

                    if !emit(tx, StreamEvent::review(&node_id, &completion.text)).await {
                        return Ok(());
                    }

                    if run.auto_advance {
                        // The agent approves its own draft and unlocks
                        // successors. A ledger failure surfaces as a failed
                        // step, never silently.
                        match ctx
                            .steps
                            .upsert(
                                &ctx.user_id,
                                &workflow.id,
                                &node_id,
                                StepPatch::approve(completion.text),
                            )
                            .await
                        {
                            Ok(_) => {
                                if !emit(tx, StreamEvent::step(&node_id, NodeStatus::Completed))
                                    .await
                                {
                                    return Ok(());
                                }
                            }
                            Err(e) => {
                                tracing::warn!(node_id = %node_id, "Ledger write failed: {}", e);
                                errored.insert(node_id.clone());
                                if !emit(tx, StreamEvent::step(&node_id, NodeStatus::Error)).await {
                                    return Ok(());
                                }
                            }
                        }
                    } else {
                        drafted.insert(node_id.clone());
                    }
                }
                Err(e) => {
                    // Node-terminal, not fatal to the run: siblings continue.
                    tracing::warn!(node_id = %node_id, "Draft generation failed: {}", e);
                    errored.insert(node_id.clone());
                    if !emit(tx, StreamEvent::step(&node_id, NodeStatus::Error)).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    let completed = ctx.steps.completed_set(&ctx.user_id, &workflow.id).await?;
    let summary = run_summary(&workflow, &topo, &completed, &drafted, &errored);
    emit(tx, StreamEvent::text(summary)).await;
    Ok(())
}

/// Build the drafting prompt for one step: its instructions, the results of
/// already-completed steps, and the request's own message/attachments.
fn draft_prompt(
    workflow: &Workflow,
    node_id: &str,
    prior: &[StepRecord],
    request: &ChatRequest,
) -> String {
    let mut prompt = format!("Workflow: {}\n", workflow.name);
    if let Some(desc) = &workflow.description {
        prompt.push_str(&format!("{}\n", desc));
    }

    prompt.push_str(&format!("\nStep: {}\n", node_id));
    if let Some(node) = workflow.node(node_id) {
        if let Some(title) = &node.title {
            prompt.push_str(&format!("Title: {}\n", title));
        }
        if let Some(instructions) = &node.instructions {
            prompt.push_str(&format!("Instructions: {}\n", instructions));
        }
    }

    let completed_results: Vec<&StepRecord> = prior
        .iter()
        .filter(|r| r.completed && r.result.is_some())
        .collect();
    if !completed_results.is_empty() {
        prompt.push_str("\nCompleted upstream steps:\n");
        for record in completed_results {
            prompt.push_str(&format!(
                "- {}: {}\n",
                record.node_id,
                record.result.as_deref().unwrap_or("")
            ));
        }
    }

    let context = prompt_with_attachments(request);
    if !context.trim().is_empty() {
        prompt.push_str(&format!("\nAdditional context from the auditor:\n{}\n", context));
    }

    prompt.push_str("\nDraft the result for this step.");
    prompt
}

fn run_summary(
    workflow: &Workflow,
    topo: &TopologicalOrder,
    completed: &HashSet<String>,
    drafted: &HashSet<String>,
    errored: &HashSet<String>,
) -> String {
    let total = workflow.nodes.len();
    let node_ids = workflow.node_ids();
    let unreachable: Vec<String> = topo.omitted(&node_ids).into_iter().cloned().collect();

    if completed.len() == total && total > 0 {
        return format!("Workflow complete: all {} steps are approved.", total);
    }

    let mut lines = vec![format!(
        "Run finished: {}/{} steps completed.",
        completed.len(),
        total
    )];

    if !drafted.is_empty() {
        let mut waiting: Vec<&str> = drafted.iter().map(String::as_str).collect();
        waiting.sort_unstable();
        lines.push(format!(
            "{} draft(s) awaiting your review: {}.",
            waiting.len(),
            waiting.join(", ")
        ));
    }

    if !errored.is_empty() {
        let mut failed: Vec<&str> = errored.iter().map(String::as_str).collect();
        failed.sort_unstable();
        lines.push(format!(
            "{} step(s) failed and block their successors: {}.",
            failed.len(),
            failed.join(", ")
        ));
    }

    if !unreachable.is_empty() {
        lines.push(format!(
            "{} step(s) are unreachable due to a dependency cycle: {}.",
            unreachable.len(),
            unreachable.join(", ")
        ));
    }

    lines.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    use crate::agent::{dispatch, AgentRole, ModelClient, ScriptedModel};
    use crate::db::Database;
    use crate::graph::Edge;
    use crate::models::{RunMode, StepNode};
    use crate::store::WorkflowStore;

    fn run_request(workflow_id: &str, auto_advance: bool) -> ChatRequest {
        ChatRequest {
            message: Some("run it".to_string()),
            model: "claude-sonnet-4-20250514".to_string(),
            agent_id: "copilot".to_string(),
            run_mode: Some(RunMode {
                workflow_id: workflow_id.to_string(),
                workflow_slug: None,
                auto_advance,
            }),
            ..Default::default()
        }
    }

    async fn seed_workflow(db: &Database) -> Workflow {
        let store = WorkflowStore::new(db.clone());
        let mut w = Workflow::new("u1", "Cash Audit", "cash-audit");
        w.nodes = vec![
            StepNode::with_instructions("A", "Plan the cash audit"),
            StepNode::with_instructions("B", "Count petty cash"),
            StepNode::with_instructions("C", "Confirm bank balances"),
        ];
        w.edges = vec![Edge::new("A", "B"), Edge::new("A", "C")];
        store.save(&w).await.unwrap();
        w
    }

    fn statuses(events: &[StreamEvent]) -> Vec<(String, NodeStatus)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::StepStatus {
                    node_id, status, ..
                } => Some((node_id.clone(), *status)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_single_pass_drafts_frontier_only() {
        let db = Database::open_in_memory().unwrap();
        let w = seed_workflow(&db).await;
        let model = ScriptedModel::new().with_reply("plan draft");
        let ctx = AgentContext::new("u1", db, ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let events: Vec<StreamEvent> = agent
            .stream_message(run_request(&w.id, false))
            .collect::<Vec<_>>()
            .await;

        // Initial frontier is [A]: one executing + one review, then the run
        // stops for human approval.
        assert_eq!(
            statuses(&events),
            vec![
                ("A".to_string(), NodeStatus::Executing),
                ("A".to_string(), NodeStatus::Review),
            ]
        );
        assert_eq!(model.call_count(), 1);
        assert_eq!(events.last(), Some(&StreamEvent::Done));

        let summary = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(summary.contains("awaiting your review"));
    }

    #[tokio::test]
    async fn test_auto_advance_completes_whole_workflow() {
        let db = Database::open_in_memory().unwrap();
        let w = seed_workflow(&db).await;
        let model = ScriptedModel::new()
            .with_reply("draft A")
            .with_reply("draft B")
            .with_reply("draft C");
        let ctx = AgentContext::new("u1", db.clone(), ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let events: Vec<StreamEvent> = agent
            .stream_message(run_request(&w.id, true))
            .collect::<Vec<_>>()
            .await;

        // A unlocks B and C; everything completes in dependency order.
        let seen = statuses(&events);
        assert_eq!(seen[0], ("A".to_string(), NodeStatus::Executing));
        assert_eq!(seen[2], ("A".to_string(), NodeStatus::Completed));
        assert_eq!(seen.len(), 9);
        assert_eq!(
            seen.iter().filter(|(_, s)| *s == NodeStatus::Completed).count(),
            3
        );

        let steps = crate::store::StepStore::new(db);
        let completed = steps.completed_set("u1", &w.id).await.unwrap();
        assert_eq!(completed.len(), 3);

        let summary = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(summary.contains("all 3 steps"));
    }

    #[tokio::test]
    async fn test_failed_node_blocks_successors_but_not_siblings() {
        let db = Database::open_in_memory().unwrap();
        let store = WorkflowStore::new(db.clone());
        let mut w = Workflow::new("u1", "Split Audit", "split-audit");
        // Two independent branches: A→B and C→D.
        w.nodes = ["A", "B", "C", "D"].iter().map(|n| StepNode::new(*n)).collect();
        w.edges = vec![Edge::new("A", "B"), Edge::new("C", "D")];
        store.save(&w).await.unwrap();

        let model = ScriptedModel::new()
            .with_failure("model refused")
            .with_reply("draft C")
            .with_reply("draft D");
        let ctx = AgentContext::new("u1", db, ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let events: Vec<StreamEvent> = agent
            .stream_message(run_request(&w.id, true))
            .collect::<Vec<_>>()
            .await;

        let seen = statuses(&events);
        // A errors; C and then D still complete; B never starts.
        assert!(seen.contains(&("A".to_string(), NodeStatus::Error)));
        assert!(seen.contains(&("C".to_string(), NodeStatus::Completed)));
        assert!(seen.contains(&("D".to_string(), NodeStatus::Completed)));
        assert!(!seen.iter().any(|(n, _)| n == "B"));

        let summary = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(summary.contains("failed"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new();
        let ctx = AgentContext::new("u1", db, ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let events: Vec<StreamEvent> = agent
            .stream_message(run_request("missing", false))
            .collect::<Vec<_>>()
            .await;

        assert!(matches!(events[0], StreamEvent::Error { .. }));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cyclic_nodes_reported_unreachable() {
        let db = Database::open_in_memory().unwrap();
        let store = WorkflowStore::new(db.clone());
        let mut w = Workflow::new("u1", "Tangled", "tangled");
        w.nodes = ["A", "X", "Y"].iter().map(|n| StepNode::new(*n)).collect();
        // X and Y depend on each other: both unreachable.
        w.edges = vec![Edge::new("X", "Y"), Edge::new("Y", "X")];
        store.save(&w).await.unwrap();

        let model = ScriptedModel::new().with_reply("draft A");
        let ctx = AgentContext::new("u1", db, ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let events: Vec<StreamEvent> = agent
            .stream_message(run_request(&w.id, true))
            .collect::<Vec<_>>()
            .await;

        let seen = statuses(&events);
        assert!(seen.contains(&("A".to_string(), NodeStatus::Completed)));

        let summary = events
            .iter()
            .rev()
            .find_map(|e| match e {
                StreamEvent::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap();
        assert!(summary.contains("unreachable"));
        assert!(summary.contains("X"));
    }
}

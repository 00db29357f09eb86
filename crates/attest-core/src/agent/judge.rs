//! Judge variant — scores a submitted draft against an audit-quality rubric.

use tokio::sync::mpsc;

use super::{emit, prompt_with_attachments, track_usage, AgentContext};
use crate::agent::events::StreamEvent;
use crate::error::ServerError;
use crate::models::ChatRequest;

const JUDGE_SYSTEM_PROMPT: &str = "You are an audit quality reviewer. Score the submitted step \
result on a 1-10 scale across three dimensions: completeness (was the instructed work \
performed?), evidence (is every assertion tied to named evidence?), and clarity (could an \
outside reviewer follow it?). Give each dimension a score with a one-sentence justification, \
then an overall verdict of pass, revise, or fail.";

pub(super) async fn run(
    ctx: &AgentContext,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ServerError> {
    let mut prompt = prompt_with_attachments(request);

    // When a run target is named, pull that step's current result in as the
    // subject under review.
    if let Some(run) = &request.run_mode {
        if let Some(workflow) = ctx.workflows.get(&run.workflow_id, &ctx.user_id).await? {
            let records = ctx.steps.list_for_workflow(&ctx.user_id, &workflow.id).await?;
            let results: Vec<String> = records
                .iter()
                .filter_map(|r| {
                    r.result
                        .as_ref()
                        .map(|text| format!("Step {}: {}", r.node_id, text))
                })
                .collect();
            if !results.is_empty() {
                prompt.push_str("\n\nStep results under review:\n");
                prompt.push_str(&results.join("\n"));
            }
        }
    }

    let completion = ctx
        .model
        .complete(&request.model, JUDGE_SYSTEM_PROMPT, &request.history, &prompt)
        .await?;

    track_usage(ctx, request, &completion).await;

    emit(tx, StreamEvent::text(completion.text)).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    use crate::agent::{dispatch, AgentRole, ModelClient, ScriptedModel};
    use crate::db::Database;

    #[tokio::test]
    async fn test_judge_streams_verdict() {
        let model = ScriptedModel::new().with_reply("completeness 8, evidence 6, clarity 9: revise");
        let ctx = AgentContext::new(
            "u1",
            Database::open_in_memory().unwrap(),
            ModelClient::Scripted(model.clone()),
        );
        let agent = dispatch(AgentRole::Judge, ctx);

        let request = ChatRequest {
            message: Some("Counted petty cash, matched to ledger.".to_string()),
            model: "claude-sonnet-4-20250514".to_string(),
            agent_id: "judge".to_string(),
            ..Default::default()
        };

        let events: Vec<StreamEvent> = agent.stream_message(request).collect::<Vec<_>>().await;
        assert_eq!(
            events,
            vec![
                StreamEvent::text("completeness 8, evidence 6, clarity 9: revise"),
                StreamEvent::Done
            ]
        );
        assert_eq!(model.call_count(), 1);
    }
}

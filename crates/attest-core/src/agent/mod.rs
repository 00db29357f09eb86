//! Agent dispatch and the uniform streaming contract.
//!
//! A request declares a role; `dispatch` builds the matching variant from a
//! closed set (copilot orchestrator / judge / character persona). Every
//! variant exposes exactly two operations: `stream_message`, which yields a
//! finite FIFO sequence of `StreamEvent`s, and `close`, which is idempotent
//! and runs exactly once per constructed variant on every exit path —
//! including when the caller disconnects mid-stream.
//!
//! The dispatcher itself holds no state between calls: a new variant is
//! constructed per request, and the budget check in the HTTP adapter
//! happens-before construction.

pub mod characters;
pub mod events;
pub mod model_client;

mod judge;
mod orchestrator;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::ChatRequest;
use crate::store::{StepStore, WorkflowStore};
use crate::usage::UsageGovernor;

pub use characters::CharacterConfig;
pub use events::{NodeStatus, StreamEvent};
pub use model_client::{Completion, HttpModelClient, ModelClient, ScriptedModel};

/// Events buffered between producer and consumer; production suspends once
/// the consumer stops draining.
const STREAM_BUFFER: usize = 32;

const COPILOT_SYSTEM_PROMPT: &str = "You are an audit copilot. You help auditors execute audit \
procedure workflows: you draft step results from the step's instructions and the evidence \
provided, and you answer methodology questions. Be concise and cite the evidence you relied on.";

// ─── Roles ────────────────────────────────────────────────────────────────

/// Declared agent role on a request.
#[derive(Debug, Clone)]
pub enum AgentRole {
    /// Default orchestrator: chats, and runs workflows in run mode.
    Copilot,
    /// Scores a submitted draft against an audit-quality rubric.
    Judge,
    /// Persona-driven reviewer.
    Character(CharacterConfig),
}

impl AgentRole {
    /// Parse a declared role id. Unknown character ids are rejected here,
    /// before any model call or ledger access.
    pub fn parse(agent_id: &str) -> Result<Self, ServerError> {
        match agent_id {
            "" | "copilot" => Ok(Self::Copilot),
            "judge" => Ok(Self::Judge),
            other => {
                if let Some(id) = other.strip_prefix("character:") {
                    CharacterConfig::by_id(id).map(Self::Character).ok_or_else(|| {
                        ServerError::BadRequest(format!("Unknown character '{}'", id))
                    })
                } else {
                    Err(ServerError::BadRequest(format!(
                        "Unknown agent role '{}'",
                        other
                    )))
                }
            }
        }
    }
}

// ─── Context & dispatch ───────────────────────────────────────────────────

/// Everything a variant needs, passed explicitly at dispatch time — there
/// is no ambient "current session" registry.
pub struct AgentContext {
    pub user_id: String,
    pub workflows: WorkflowStore,
    pub steps: StepStore,
    pub governor: UsageGovernor,
    pub model: ModelClient,
}

impl AgentContext {
    pub fn new(user_id: impl Into<String>, db: Database, model: ModelClient) -> Self {
        Self {
            user_id: user_id.into(),
            workflows: WorkflowStore::new(db.clone()),
            steps: StepStore::new(db.clone()),
            governor: UsageGovernor::new(db),
            model,
        }
    }
}

/// Construct the variant for a role. One instance per request.
pub fn dispatch(role: AgentRole, ctx: AgentContext) -> Agent {
    Agent {
        role,
        ctx,
        closed: false,
    }
}

// ─── The variant ──────────────────────────────────────────────────────────

/// A constructed agent variant. Consumed by `stream_message`; `close` is
/// guaranteed by the producer task on every exit path.
pub struct Agent {
    role: AgentRole,
    ctx: AgentContext,
    closed: bool,
}

impl Agent {
    /// Produce this request's event sequence. Finite and not restartable —
    /// a new call on a new variant produces a new sequence. Events are
    /// produced lazily through a bounded channel: once the receiver is
    /// dropped (client disconnect) the next send fails, production stops,
    /// and `close` still runs.
    pub fn stream_message(self, request: ChatRequest) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        tokio::spawn(async move {
            let mut agent = self;
            match agent.run(&request, &tx).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::warn!(role = ?agent.role_name(), "Agent run failed: {}", e);
                    let _ = tx.send(StreamEvent::error(e.to_string())).await;
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
            agent.close().await;
        });
        ReceiverStream::new(rx)
    }

    /// Release underlying model-session resources. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.ctx.model.release().await;
        tracing::debug!(role = self.role_name(), "Agent variant closed");
    }

    fn role_name(&self) -> &'static str {
        match &self.role {
            AgentRole::Copilot => "copilot",
            AgentRole::Judge => "judge",
            AgentRole::Character(_) => "character",
        }
    }

    async fn run(
        &mut self,
        request: &ChatRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), ServerError> {
        match &self.role {
            AgentRole::Copilot => {
                if request.run_mode.is_some() {
                    orchestrator::run_workflow(&self.ctx, request, tx).await
                } else {
                    run_chat(&self.ctx, COPILOT_SYSTEM_PROMPT, request, tx).await
                }
            }
            AgentRole::Judge => judge::run(&self.ctx, request, tx).await,
            AgentRole::Character(config) => {
                let system_prompt = config.system_prompt.clone();
                run_chat(&self.ctx, &system_prompt, request, tx).await
            }
        }
    }
}

// ─── Shared chat path ─────────────────────────────────────────────────────

/// Send an event; `false` means the receiver is gone and production must stop.
async fn emit(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Fold attachment contents into the user prompt.
fn prompt_with_attachments(request: &ChatRequest) -> String {
    let mut prompt = request.message.clone().unwrap_or_default();
    for attachment in &request.attachments {
        if let Some(content) = &attachment.content {
            prompt.push_str(&format!(
                "\n\n--- Attachment: {} ---\n{}",
                attachment.name, content
            ));
        }
    }
    prompt
}

/// Single-completion conversational path shared by the copilot (outside run
/// mode) and character personas.
async fn run_chat(
    ctx: &AgentContext,
    system_prompt: &str,
    request: &ChatRequest,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), ServerError> {
    let prompt = prompt_with_attachments(request);
    let completion = ctx
        .model
        .complete(&request.model, system_prompt, &request.history, &prompt)
        .await?;

    track_usage(ctx, request, &completion).await;

    emit(tx, StreamEvent::text(completion.text)).await;
    Ok(())
}

/// Append this call's usage row. Fire-and-forget inside the governor.
async fn track_usage(ctx: &AgentContext, request: &ChatRequest, completion: &Completion) {
    ctx.governor
        .track_usage(crate::models::UsageRecord::new(
            &ctx.user_id,
            &completion.model,
            completion.prompt_tokens,
            completion.output_tokens,
            request.session_id.clone(),
        ))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn request(agent_id: &str) -> ChatRequest {
        ChatRequest {
            message: Some("hello".to_string()),
            model: "claude-sonnet-4-20250514".to_string(),
            agent_id: agent_id.to_string(),
            ..Default::default()
        }
    }

    fn context(model: &ScriptedModel) -> AgentContext {
        AgentContext::new(
            "u1",
            Database::open_in_memory().unwrap(),
            ModelClient::Scripted(model.clone()),
        )
    }

    #[test]
    fn test_role_parsing() {
        assert!(matches!(AgentRole::parse("copilot"), Ok(AgentRole::Copilot)));
        assert!(matches!(AgentRole::parse(""), Ok(AgentRole::Copilot)));
        assert!(matches!(AgentRole::parse("judge"), Ok(AgentRole::Judge)));
        assert!(matches!(
            AgentRole::parse("character:skeptic"),
            Ok(AgentRole::Character(_))
        ));
        assert!(AgentRole::parse("character:ghost").is_err());
        assert!(AgentRole::parse("wizard").is_err());
    }

    #[tokio::test]
    async fn test_unknown_character_rejected_before_any_model_call() {
        let model = ScriptedModel::new();
        let err = AgentRole::parse("character:ghost").unwrap_err();
        assert!(matches!(err, ServerError::BadRequest(_)));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_chat_stream_ends_with_done() {
        let model = ScriptedModel::new().with_reply("drafted response");
        let agent = dispatch(AgentRole::Copilot, context(&model));

        let events: Vec<StreamEvent> = agent
            .stream_message(request("copilot"))
            .collect::<Vec<_>>()
            .await;

        assert_eq!(
            events,
            vec![StreamEvent::text("drafted response"), StreamEvent::Done]
        );
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_still_reaches_done() {
        let model = ScriptedModel::new().with_failure("model unavailable");
        let agent = dispatch(AgentRole::Character(CharacterConfig::skeptic()), context(&model));

        let events: Vec<StreamEvent> = agent
            .stream_message(request("character:skeptic"))
            .collect::<Vec<_>>()
            .await;

        assert!(matches!(events[0], StreamEvent::Error { .. }));
        assert_eq!(events.last(), Some(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn test_close_runs_exactly_once_on_disconnect() {
        let model = ScriptedModel::new().with_reply("draft");
        let agent = dispatch(AgentRole::Copilot, context(&model));

        // Simulate a client disconnect: drop the stream without draining it.
        let stream = agent.stream_message(request("copilot"));
        drop(stream);

        // The producer task notices the dropped receiver and still closes.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(model.close_count(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let model = ScriptedModel::new();
        let mut agent = dispatch(AgentRole::Judge, context(&model));
        agent.close().await;
        agent.close().await;
        assert_eq!(model.close_count(), 1);
    }

    #[tokio::test]
    async fn test_chat_appends_usage_record() {
        let db = Database::open_in_memory().unwrap();
        let model = ScriptedModel::new().with_reply("a reply that is long enough to count");
        let ctx = AgentContext::new("u1", db.clone(), ModelClient::Scripted(model.clone()));
        let agent = dispatch(AgentRole::Copilot, ctx);

        let _events: Vec<StreamEvent> = agent
            .stream_message(request("copilot"))
            .collect::<Vec<_>>()
            .await;

        let governor = UsageGovernor::new(db);
        let check = governor.check_can_spend("u1").await.unwrap();
        assert!(check.current_spend > 0.0);
    }
}

//! Message pipeline: model loop, tool dispatch and the approval queue.
//!
//! Every side-effecting tool call passes through the autonomy tier and the
//! boundary enforcer before it can reach the gateway. Calls are collected
//! while the model loop runs, decided without writing, committed together
//! with the conversation turns and only then executed. A turn that fails at
//! any point before its commit leaves no rows and no side effects.

mod dispatch;
pub mod prompt;
pub mod tools;
mod types;

pub use tools::{ActionCall, ResolvedCall};
pub use types::{
    ActionLogEntry, ActionRecord, ApprovalOutcome, ApprovalStatus, EscalationResponse,
    MessageOutcome, UndoOutcome,
};

use crate::config::{AutonomyConfig, BoundaryConfig, OrchestratorConfig};
use crate::error::{ActionError, ProviderError, Result, SemblanceError};
use crate::gateway::{ActionEnvelope, GatewayTransport};
use crate::knowledge::{KnowledgeSearch, ResultChunk, SearchOptions, format_chunks};
use crate::llm::{ChatMessage, ChatProvider, ChatRequest, ToolSpec};
use crate::security::autonomy::domain_of;
use crate::security::{ActionClass, AutonomyManager, AutonomyTier, BoundaryEnforcer};
use crate::store::{
    ActionStore, ApprovalPattern, ApprovalPatternStore, ConversationStore, ConversationTurn,
    Disposition, EscalationPrompt, EscalationStore, NewEscalation, PendingAction, TurnRole,
    sub_type_for,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use uuid::Uuid;

/// Collaborators and settings an [`Orchestrator`] is built from.
pub struct OrchestratorDeps {
    pub provider: Arc<dyn ChatProvider>,
    pub knowledge: Arc<dyn KnowledgeSearch>,
    pub transport: Arc<dyn GatewayTransport>,
    pub autonomy: Arc<AutonomyManager>,
    pub pool: SqlitePool,
    pub boundaries: BoundaryConfig,
    pub config: OrchestratorConfig,
}

type ConversationGate = Arc<tokio::sync::Mutex<()>>;

pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    knowledge: Arc<dyn KnowledgeSearch>,
    transport: Arc<dyn GatewayTransport>,
    autonomy: Arc<AutonomyManager>,
    enforcer: BoundaryEnforcer,
    actions: ActionStore,
    patterns: ApprovalPatternStore,
    conversations: ConversationStore,
    escalations: EscalationStore,
    config: OrchestratorConfig,
    tools: Vec<ToolSpec>,
    gates: Mutex<HashMap<String, Weak<tokio::sync::Mutex<()>>>>,
}

/// What the model loop leaves behind for dispatch.
struct LoopOutput {
    text: String,
    deferred: Vec<ActionCall>,
    diagnostics: Vec<String>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        let patterns =
            ApprovalPatternStore::new(deps.pool.clone(), deps.autonomy.auto_execute_threshold());
        Self {
            enforcer: BoundaryEnforcer::new(deps.boundaries, patterns.clone()),
            actions: ActionStore::new(deps.pool.clone()),
            conversations: ConversationStore::new(deps.pool.clone()),
            escalations: EscalationStore::new(deps.pool),
            patterns,
            provider: deps.provider,
            knowledge: deps.knowledge,
            transport: deps.transport,
            autonomy: deps.autonomy,
            config: deps.config,
            tools: tools::tool_specs(),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Make actions claimed by a crashed process approvable again.
    ///
    /// Only claims older than the configured lease are released, so an
    /// execution still waiting on the gateway in another process keeps its
    /// claim.
    pub async fn recover(&self) -> Result<u64> {
        let released = self
            .actions
            .release_stale_claims(self.config.claim_lease())
            .await?;
        if released > 0 {
            tracing::warn!(released, "released claims left by an interrupted run");
        }
        Ok(released)
    }

    // ── Exposed operations ──────────────────────────────────────────────

    /// Run one user message through the model and the trust pipeline.
    ///
    /// Either the whole turn lands (both conversation turns plus every action
    /// record) or the error is returned with nothing persisted and nothing
    /// sent. Auto-executed actions run only after the commit.
    pub async fn process_message(
        &self,
        text: &str,
        conversation_id: Option<&str>,
    ) -> Result<MessageOutcome> {
        let conversation_id = conversation_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or_else(ConversationStore::new_conversation_id, str::to_string);

        let gate = self.conversation_gate(&conversation_id);
        let _turn = gate.lock().await;

        let history = self
            .conversations
            .get_turns(&conversation_id, Some(self.config.history_limit))
            .await?;
        let context = self.retrieve_context(text).await?;

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(prompt::build_system_prompt(
            self.config.system_prompt.as_deref(),
            &context,
        )));
        messages.extend(history.iter().map(|turn| match turn.role {
            TurnRole::User => ChatMessage::user(&turn.content),
            TurnRole::Assistant => ChatMessage::assistant(&turn.content),
        }));
        messages.push(ChatMessage::user(text));

        let output = self.run_model_loop(messages).await?;

        let mut staged = Vec::with_capacity(output.deferred.len());
        let mut decisions = Vec::with_capacity(output.deferred.len());
        for call in output.deferred {
            let planned = self.plan_action(call).await;
            staged.push((planned.new, planned.disposition));
            decisions.push(planned.decision);
        }
        let queued = staged
            .iter()
            .filter(|(_, disposition)| *disposition == Disposition::Queue)
            .count();
        let draft = prompt::compose_reply(&output.text, &output.diagnostics, queued);

        let committed = self
            .conversations
            .commit_turn(&conversation_id, text, &draft, staged)
            .await?;

        let mut records = Vec::with_capacity(decisions.len());
        for ((action, claim), decision) in committed.actions.into_iter().zip(decisions) {
            records.push(self.settle(action, claim, decision).await);
        }

        let outcome = MessageOutcome {
            message: draft,
            conversation_id,
            actions: records,
        };
        let pending = outcome.pending_count();
        if pending == queued {
            return Ok(outcome);
        }

        let message = prompt::compose_reply(&output.text, &output.diagnostics, pending);
        if let Err(error) = self
            .conversations
            .replace_content(&committed.assistant.id, &message)
            .await
        {
            tracing::warn!(turn = %committed.assistant.id, %error, "failed to update reply after execution");
        }
        Ok(MessageOutcome { message, ..outcome })
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Vec<ConversationTurn>> {
        Ok(self.conversations.get_turns(conversation_id, None).await?)
    }

    pub async fn get_pending_actions(&self) -> Result<Vec<PendingAction>> {
        Ok(self.actions.list_pending().await?)
    }

    /// Execute a queued action.
    ///
    /// On a transport failure the action stays `pending_approval` and the
    /// error is returned so the caller can retry.
    pub async fn approve_action(&self, id: &str) -> Result<ApprovalOutcome> {
        let claim = self.actions.claim(id).await?;
        let action = match self.actions.get(id).await {
            Ok(Some(action)) => action,
            Ok(None) => {
                return Err(ActionError::NotFound { id: id.to_string() }.into());
            }
            Err(err) => {
                self.actions.release(claim).await?;
                return Err(err.into());
            }
        };

        match self.send(&action).await {
            Ok(result) => {
                let executed = self.actions.complete(claim).await?;
                self.note_approval(&executed).await;
                tracing::info!(id, action = %executed.action, "approved action executed");
                Ok(ApprovalOutcome {
                    action: executed,
                    result,
                })
            }
            Err(err) => {
                tracing::warn!(id, action = %action.action, error = %err, "approved action failed; left pending");
                self.actions.release(claim).await?;
                Err(err.into())
            }
        }
    }

    /// Refuse a queued action. No gateway call is made.
    pub async fn reject_action(&self, id: &str) -> Result<PendingAction> {
        let rejected = self.actions.reject(id).await?;
        if let Err(error) = self
            .patterns
            .record_rejection(&rejected.action, &rejected.sub_type)
            .await
        {
            tracing::warn!(id, %error, "failed to record rejection");
        }
        tracing::info!(id, action = %rejected.action, "action rejected");
        Ok(rejected)
    }

    /// Ask the gateway to reverse an executed action.
    ///
    /// The action keeps its `executed` status and gains `undone_at`. A gateway
    /// failure clears the mark so the undo can be retried. A completed undo
    /// counts against the pair's trust the way a rejection does.
    pub async fn undo_action(&self, id: &str) -> Result<UndoOutcome> {
        let mark = self.actions.mark_undone(id).await?;
        match self.transport.undo_action(id).await {
            Ok(result) => {
                let action = self.actions.finish_undo(mark).await?;
                if let Err(error) = self
                    .patterns
                    .record_rejection(&action.action, &action.sub_type)
                    .await
                {
                    tracing::warn!(id, %error, "failed to record undo against pattern");
                }
                tracing::info!(id, action = %action.action, "action undone");
                Ok(UndoOutcome { action, result })
            }
            Err(err) => {
                tracing::warn!(id, error = %err, "undo failed; action left executed");
                self.actions.clear_undo(mark).await?;
                Err(err.into())
            }
        }
    }

    // ── Escalation prompts ──────────────────────────────────────────────

    /// Offer a one-rung tier raise for every domain holding routine pairs.
    ///
    /// Returns only prompts created by this call. A suggestion already
    /// offered for the same domain and tier, answered or not, is not repeated.
    pub async fn check_escalations(&self) -> Result<Vec<EscalationPrompt>> {
        let patterns = self.patterns.list_patterns().await?;
        let mut routine: BTreeMap<&str, Vec<&ApprovalPattern>> = BTreeMap::new();
        for pattern in patterns.iter().filter(|p| p.is_routine()) {
            routine
                .entry(domain_of(&pattern.action_type))
                .or_default()
                .push(pattern);
        }

        let mut offered = Vec::new();
        for (domain, pairs) in routine {
            let current_tier = self.autonomy.tier_for(domain);
            let Some(suggested_tier) = current_tier.next() else {
                continue;
            };
            let kinds = pairs
                .iter()
                .map(|p| format!("{} ({})", p.action_type, p.sub_type))
                .collect::<Vec<_>>()
                .join(", ");
            let new = NewEscalation {
                domain: domain.to_string(),
                current_tier,
                suggested_tier,
                reason: format!("routinely approved: {kinds}"),
            };
            if let Some(prompt) = self.escalations.offer(new).await? {
                tracing::info!(domain, from = %current_tier, to = %suggested_tier, "escalation offered");
                offered.push(prompt);
            }
        }
        Ok(offered)
    }

    pub async fn active_escalations(&self) -> Result<Vec<EscalationPrompt>> {
        Ok(self.escalations.list_active().await?)
    }

    /// Accept or dismiss a prompt. Accepting raises the domain's tier unless
    /// it already sits at or above the suggestion.
    pub async fn respond_to_escalation(
        &self,
        id: &str,
        accepted: bool,
    ) -> Result<EscalationResponse> {
        let prompt = self.escalations.resolve(id, accepted).await?;
        if accepted && self.autonomy.tier_for(&prompt.domain) < prompt.suggested_tier {
            self.autonomy
                .set_domain_tier(&prompt.domain, prompt.suggested_tier);
        }
        Ok(EscalationResponse {
            prompt,
            autonomy: self.autonomy.config(),
        })
    }

    // ── Autonomy and trust ──────────────────────────────────────────────

    /// Change the tier for one domain, or the default tier when `domain` is `None`.
    pub fn set_autonomy_tier(&self, domain: Option<&str>, tier: AutonomyTier) -> AutonomyConfig {
        match domain.map(str::trim).filter(|d| !d.is_empty()) {
            Some(domain) => self.autonomy.set_domain_tier(domain, tier),
            None => self.autonomy.set_default_tier(tier),
        }
        self.autonomy.config()
    }

    /// Drop a domain override so the default tier applies. Returns whether
    /// one existed.
    pub fn clear_autonomy_tier(&self, domain: &str) -> bool {
        self.autonomy.clear_domain_tier(domain.trim())
    }

    pub fn autonomy_config(&self) -> AutonomyConfig {
        self.autonomy.config()
    }

    /// How close the kind of action `payload` describes is to running unattended.
    pub async fn approval_status(&self, action: &str, payload: &Value) -> Result<ApprovalStatus> {
        let sub_type = sub_type_for(action, payload);
        let pattern = self.patterns.get_pattern(action, &sub_type).await?;
        Ok(ApprovalStatus {
            action: action.to_string(),
            consecutive_approvals: pattern.as_ref().map_or(0, |p| p.consecutive_approvals),
            auto_execute_threshold: pattern
                .as_ref()
                .map_or(self.patterns.base_threshold(), |p| p.auto_execute_threshold),
            routine: pattern.as_ref().is_some_and(|p| p.is_routine()),
            sub_type,
        })
    }

    /// Trust history of every pair seen so far.
    pub async fn approval_patterns(&self) -> Result<Vec<ApprovalPattern>> {
        Ok(self.patterns.list_patterns().await?)
    }

    /// Every recorded action regardless of status, newest first.
    pub async fn action_log(&self, limit: u32, offset: u32) -> Result<Vec<ActionLogEntry>> {
        let actions = self.actions.list_recent(limit, offset).await?;
        Ok(actions.into_iter().map(log_entry).collect())
    }

    // ── Model loop ──────────────────────────────────────────────────────

    async fn retrieve_context(&self, text: &str) -> Result<Vec<ResultChunk>> {
        if self.config.context_limit == 0 {
            return Ok(Vec::new());
        }
        self.search(text, self.config.context_limit).await
    }

    async fn search(&self, query: &str, limit: u32) -> Result<Vec<ResultChunk>> {
        self.knowledge
            .search(query, SearchOptions { limit })
            .await
            .map_err(|err| SemblanceError::from(ProviderError::Knowledge(format!("{err:#}"))))
    }

    /// Call the model until it stops asking for tools that feed back into it.
    ///
    /// Local searches and gateway reads are answered and returned to the
    /// model. Side-effecting calls are only collected.
    async fn run_model_loop(&self, mut messages: Vec<ChatMessage>) -> Result<LoopOutput> {
        let max_iterations = self.config.effective_max_tool_iterations();
        let mut output = LoopOutput {
            text: String::new(),
            deferred: Vec::new(),
            diagnostics: Vec::new(),
        };

        for iteration in 1..=max_iterations {
            let request = ChatRequest {
                messages: messages.clone(),
                tools: self.tools.clone(),
                ..ChatRequest::default()
            };
            let response = self.provider.chat(&request).await.map_err(|err| {
                SemblanceError::Provider(ProviderError::Chat {
                    provider: self.provider.name().to_string(),
                    message: format!("{err:#}"),
                })
            })?;

            output.text.clone_from(&response.message);
            if !response.has_tool_calls() {
                break;
            }

            let mut feedback = Vec::new();
            for call in &response.tool_calls {
                match tools::resolve(call, Some(&response.message)) {
                    Err(SemblanceError::Validation(problem)) => {
                        tracing::warn!(tool = %call.name, %problem, "dropping malformed tool call");
                        output.diagnostics.push(problem);
                    }
                    Err(other) => return Err(other),
                    Ok(ResolvedCall::Search { query, limit }) => {
                        let chunks = self.search(&query, limit).await?;
                        let content = if chunks.is_empty() {
                            "No results.".to_string()
                        } else {
                            format_chunks(&chunks)
                        };
                        feedback.push(ChatMessage::tool_result(call, content));
                    }
                    Ok(ResolvedCall::Action(action))
                        if self.autonomy.classify(&action.action) == ActionClass::Read =>
                    {
                        feedback.push(ChatMessage::tool_result(call, self.read(&action).await));
                    }
                    Ok(ResolvedCall::Action(action)) => output.deferred.push(action),
                }
            }

            if feedback.is_empty() {
                break;
            }
            if iteration == max_iterations {
                tracing::warn!(max_iterations, "tool loop hit its iteration limit");
                break;
            }
            messages.push(ChatMessage::assistant_with_calls(
                response.message.clone(),
                response.tool_calls.clone(),
            ));
            messages.extend(feedback);
        }

        Ok(output)
    }

    /// Gateway read for context. Failures go back to the model as text.
    async fn read(&self, call: &ActionCall) -> String {
        let action_id = Uuid::new_v4().to_string();
        let envelope = ActionEnvelope {
            action_id: &action_id,
            action: &call.action,
            payload: &call.payload,
        };
        match self.transport.send_action(envelope).await {
            Ok(result) => result.to_string(),
            Err(err) => {
                tracing::warn!(action = %call.action, error = %err, "context read failed");
                format!("error: {err}")
            }
        }
    }

    fn conversation_gate(&self, conversation_id: &str) -> ConversationGate {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        gates.retain(|_, gate| gate.strong_count() > 0);
        if let Some(gate) = gates.get(conversation_id).and_then(Weak::upgrade) {
            return gate;
        }
        let gate = Arc::new(tokio::sync::Mutex::new(()));
        gates.insert(conversation_id.to_string(), Arc::downgrade(&gate));
        gate
    }
}

fn log_entry(action: PendingAction) -> ActionLogEntry {
    let canonical = serde_json::to_vec(&action.payload).unwrap_or_default();
    ActionLogEntry {
        payload_hash: hex::encode(Sha256::digest(&canonical)),
        id: action.id,
        action: action.action,
        sub_type: action.sub_type,
        domain: action.domain,
        autonomy_tier: action.tier,
        status: action.status,
        reasoning: action.reasoning,
        created_at: action.created_at,
        resolved_at: action.resolved_at,
        undone_at: action.undone_at,
    }
}

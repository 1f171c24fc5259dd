use crate::config::AutonomyConfig;
use crate::security::{ActionClass, AutonomyTier, Boundary};
use crate::store::{ActionStatus, EscalationPrompt, PendingAction};
use serde::Serialize;
use serde_json::Value;

/// An action produced by a message turn, with how it was decided.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    #[serde(flatten)]
    pub action: PendingAction,
    pub class: ActionClass,
    pub boundaries: Vec<Boundary>,
    /// Gateway result for actions that executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Gateway failure that left the action pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of one `process_message` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageOutcome {
    pub message: String,
    pub conversation_id: String,
    pub actions: Vec<ActionRecord>,
}

impl MessageOutcome {
    pub fn pending_count(&self) -> usize {
        self.actions
            .iter()
            .filter(|r| r.action.status == ActionStatus::PendingApproval)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalOutcome {
    pub action: PendingAction,
    pub result: Value,
}

/// An executed action the gateway reversed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UndoOutcome {
    pub action: PendingAction,
    pub result: Value,
}

/// Answer to an escalation prompt and the autonomy settings it left behind.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationResponse {
    pub prompt: EscalationPrompt,
    pub autonomy: AutonomyConfig,
}

/// Trust accumulated for the kind of action a payload describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalStatus {
    pub action: String,
    pub sub_type: String,
    pub consecutive_approvals: u32,
    pub auto_execute_threshold: u32,
    pub routine: bool,
}

/// Audit view of one action, newest first in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionLogEntry {
    pub id: String,
    pub action: String,
    pub sub_type: String,
    pub domain: String,
    pub autonomy_tier: AutonomyTier,
    pub status: ActionStatus,
    /// SHA-256 of the payload JSON, hex encoded.
    pub payload_hash: String,
    pub reasoning: Option<String>,
    pub created_at: String,
    pub resolved_at: Option<String>,
    pub undone_at: Option<String>,
}

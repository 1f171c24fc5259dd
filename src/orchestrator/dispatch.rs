use super::{ActionCall, ActionRecord, Orchestrator};
use crate::error::TransportError;
use crate::gateway::ActionEnvelope;
use crate::security::{AutonomyDecision, AutonomyVerdict, Boundary, BoundaryEnforcer, BoundaryRequest};
use crate::store::{ClaimToken, Disposition, NewAction, PendingAction, sub_type_for};
use serde_json::Value;

/// A deferred call after the trust pipeline decided it, before anything is
/// written.
pub(super) struct PlannedAction {
    pub(super) new: NewAction,
    pub(super) disposition: Disposition,
    pub(super) decision: Decision,
}

/// Why a planned action got its disposition.
pub(super) struct Decision {
    verdict: AutonomyVerdict,
    boundaries: Vec<Boundary>,
}

impl Orchestrator {
    /// Decide one deferred call. Reads only.
    ///
    /// Deny is final. Otherwise the call runs now only when the tier allows
    /// it (directly or through routine promotion) and no boundary fired.
    pub(super) async fn plan_action(&self, call: ActionCall) -> PlannedAction {
        if !self.autonomy.is_classified(&call.action) {
            tracing::warn!(action = %call.action, "unclassified action type; treated as execute");
        }
        let verdict = self.autonomy.evaluate(&call.action);
        let sub_type = sub_type_for(&call.action, &call.payload);

        let (disposition, boundaries) = if verdict.decision == AutonomyDecision::Deny {
            (Disposition::Reject, Vec::new())
        } else {
            let boundaries = self
                .enforcer
                .check_boundaries(&BoundaryRequest {
                    action: &call.action,
                    sub_type: &sub_type,
                    payload: &call.payload,
                    confidence: call.confidence,
                })
                .await;
            if self
                .may_run_now(&call.action, &sub_type, &verdict, &boundaries)
                .await
            {
                (Disposition::Execute, Vec::new())
            } else {
                (Disposition::Queue, boundaries)
            }
        };

        PlannedAction {
            new: NewAction {
                action: call.action,
                sub_type,
                payload: call.payload,
                reasoning: call.reasoning,
                domain: verdict.domain.clone(),
                tier: verdict.tier,
            },
            disposition,
            decision: Decision {
                verdict,
                boundaries,
            },
        }
    }

    async fn may_run_now(
        &self,
        action: &str,
        sub_type: &str,
        verdict: &AutonomyVerdict,
        boundaries: &[Boundary],
    ) -> bool {
        if BoundaryEnforcer::should_escalate(boundaries) {
            return false;
        }
        match verdict.decision {
            AutonomyDecision::AutoApprove => true,
            AutonomyDecision::Deny => false,
            AutonomyDecision::RequireApproval if verdict.tier.allows_routine_promotion() => {
                match self.patterns.get_pattern(action, sub_type).await {
                    Ok(pattern) => pattern.is_some_and(|p| p.is_routine()),
                    Err(error) => {
                        tracing::warn!(%error, "approval pattern lookup failed; requiring approval");
                        false
                    }
                }
            }
            AutonomyDecision::RequireApproval => false,
        }
    }

    /// Finish one committed action: run it when the commit handed back a
    /// claim, otherwise just report how it was recorded.
    pub(super) async fn settle(
        &self,
        action: PendingAction,
        claim: Option<ClaimToken>,
        decision: Decision,
    ) -> ActionRecord {
        if let Some(claim) = claim {
            return self.execute_claimed(action, claim, &decision.verdict).await;
        }
        if action.status.is_terminal() {
            tracing::info!(
                id = %action.id,
                action = %action.action,
                tier = %decision.verdict.tier,
                "action denied by autonomy tier"
            );
        } else {
            tracing::info!(
                id = %action.id,
                action = %action.action,
                decision = %decision.verdict.decision,
                boundaries = decision.boundaries.len(),
                "action queued for approval"
            );
        }
        record(action, &decision.verdict, decision.boundaries)
    }

    /// Run an action this process holds the claim for.
    ///
    /// A transport failure releases the claim and leaves the action pending.
    /// Store failures after the call are attached to the record; the turn is
    /// already committed and the claim lease covers the row.
    async fn execute_claimed(
        &self,
        action: PendingAction,
        claim: ClaimToken,
        verdict: &AutonomyVerdict,
    ) -> ActionRecord {
        match self.send(&action).await {
            Ok(result) => match self.actions.complete(claim).await {
                Ok(executed) => {
                    self.note_approval(&executed).await;
                    tracing::info!(id = %executed.id, action = %executed.action, "action auto-executed");
                    ActionRecord {
                        result: Some(result),
                        ..record(executed, verdict, Vec::new())
                    }
                }
                Err(error) => {
                    tracing::error!(id = %action.id, %error, "action executed but completion was not recorded");
                    ActionRecord {
                        result: Some(result),
                        error: Some(format!("executed but not recorded: {error}")),
                        ..record(action, verdict, Vec::new())
                    }
                }
            },
            Err(err) => {
                tracing::warn!(
                    id = %action.id,
                    action = %action.action,
                    error = %err,
                    "auto-execution failed; action left pending"
                );
                let pending = match self.actions.release(claim).await {
                    Ok(pending) => pending,
                    Err(error) => {
                        tracing::warn!(id = %action.id, %error, "claim release failed; lease will expire");
                        action
                    }
                };
                ActionRecord {
                    error: Some(err.to_string()),
                    ..record(pending, verdict, Vec::new())
                }
            }
        }
    }

    pub(super) async fn send(
        &self,
        action: &PendingAction,
    ) -> std::result::Result<Value, TransportError> {
        self.transport
            .send_action(ActionEnvelope {
                action_id: &action.id,
                action: &action.action,
                payload: &action.payload,
            })
            .await
    }

    /// Count an execution towards routine status. Failures only log.
    pub(super) async fn note_approval(&self, action: &PendingAction) {
        if let Err(error) = self
            .patterns
            .record_approval(&action.action, &action.sub_type)
            .await
        {
            tracing::warn!(id = %action.id, %error, "failed to record approval");
        }
    }
}

fn record(action: PendingAction, verdict: &AutonomyVerdict, boundaries: Vec<Boundary>) -> ActionRecord {
    ActionRecord {
        action,
        class: verdict.class,
        boundaries,
        result: None,
        error: None,
    }
}

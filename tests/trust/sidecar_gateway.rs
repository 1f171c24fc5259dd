use std::sync::Arc;

use semblance::llm::ChatResponse;
use semblance::security::AutonomyTier;
use semblance::store::{ActionStatus, open_in_memory};
use serde_json::json;

use crate::trust_harness::{ScriptedProvider, fake_sidecar, orchestrator, tool_call};

#[tokio::test]
async fn approval_executes_through_sidecar() {
    let bridge = fake_sidecar();
    let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
        "pay_bill",
        json!({"payee": "City Power", "amount": 80}),
    )]));
    let orchestrator = orchestrator(
        open_in_memory().await.unwrap(),
        AutonomyTier::Partner,
        provider,
        bridge.clone(),
        bridge.clone(),
    );

    let outcome = orchestrator.process_message("pay the power bill", None).await.unwrap();
    let action = &outcome.actions[0].action;
    assert_eq!(action.action, "finance.pay");
    assert_eq!(action.status, ActionStatus::PendingApproval);

    let approved = orchestrator.approve_action(&action.id).await.unwrap();
    assert_eq!(approved.result["executed"], "finance.pay");
    assert_eq!(approved.result["action_id"], json!(action.id));

    let undone = orchestrator.undo_action(&action.id).await.unwrap();
    assert_eq!(undone.result["undone"], json!(action.id));
    assert_eq!(undone.action.status, ActionStatus::Executed);
    assert!(undone.action.undone_at.is_some());

    bridge.shutdown().await;
    assert!(bridge.is_closed());
}

#[tokio::test]
async fn context_comes_from_sidecar_search() {
    let bridge = fake_sidecar();
    let provider = Arc::new(ScriptedProvider::new(vec![
        tool_call("search_files", json!({"query": "rent"})),
        ChatResponse::text_only("Rent is due on the 1st."),
    ]));
    let orchestrator = orchestrator(
        open_in_memory().await.unwrap(),
        AutonomyTier::Partner,
        provider,
        bridge.clone(),
        bridge.clone(),
    );

    let outcome = orchestrator.process_message("when is rent due?", None).await.unwrap();
    assert_eq!(outcome.message, "Rent is due on the 1st.");
    assert!(outcome.actions.is_empty());

    bridge.shutdown().await;
}

use std::sync::Arc;

use semblance::security::{AutonomyTier, BoundaryKind};
use semblance::store::{ActionStatus, open_in_memory};
use serde_json::json;

use crate::trust_harness::{RecordingTransport, ScriptedProvider, simple_orchestrator, tool_call};

fn lunch_invite() -> semblance::llm::ChatResponse {
    tool_call(
        "send_email",
        json!({"to": "sam@example.com", "body": "Lunch on Thursday?", "confidence": 0.92}),
    )
}

#[tokio::test]
async fn repeated_approvals_promote_a_send_to_routine() {
    let provider = Arc::new(ScriptedProvider::default());
    let transport = Arc::new(RecordingTransport::default());
    let orchestrator = simple_orchestrator(
        open_in_memory().await.unwrap(),
        AutonomyTier::Partner,
        provider.clone(),
        transport.clone(),
    );

    for round in 0..3 {
        provider.push(lunch_invite());
        let outcome = orchestrator.process_message("invite sam", None).await.unwrap();
        let record = &outcome.actions[0];
        assert_eq!(record.action.status, ActionStatus::PendingApproval, "round {round}");
        let novel = record.boundaries.iter().any(|b| b.kind == BoundaryKind::Novel);
        assert_eq!(novel, round == 0);
        orchestrator.approve_action(&record.action.id).await.unwrap();
    }

    let status = orchestrator
        .approval_status("email.send", &json!({}))
        .await
        .unwrap();
    assert!(status.routine);

    provider.push(lunch_invite());
    let outcome = orchestrator.process_message("invite sam", None).await.unwrap();
    assert_eq!(outcome.actions[0].action.status, ActionStatus::Executed);
    assert!(outcome.message.is_empty());
    assert_eq!(transport.sent().len(), 4);

    orchestrator.set_autonomy_tier(Some("email"), AutonomyTier::Guardian);
    provider.push(lunch_invite());
    let outcome = orchestrator.process_message("invite sam", None).await.unwrap();
    assert_eq!(outcome.actions[0].action.status, ActionStatus::PendingApproval);
    assert_eq!(outcome.actions[0].action.tier, AutonomyTier::Guardian);

    orchestrator
        .reject_action(&outcome.actions[0].action.id)
        .await
        .unwrap();
    let status = orchestrator
        .approval_status("email.send", &json!({}))
        .await
        .unwrap();
    assert_eq!(status.consecutive_approvals, 0);
    assert_eq!(status.auto_execute_threshold, 4);
    assert!(!status.routine);
}

#[tokio::test]
async fn replies_and_new_messages_build_trust_separately() {
    let provider = Arc::new(ScriptedProvider::default());
    let orchestrator = simple_orchestrator(
        open_in_memory().await.unwrap(),
        AutonomyTier::Partner,
        provider.clone(),
        Arc::new(RecordingTransport::default()),
    );

    provider.push(tool_call("send_email", json!({"to": "a@b.c", "body": "hi"})));
    let first = orchestrator.process_message("send", None).await.unwrap();
    orchestrator
        .approve_action(&first.actions[0].action.id)
        .await
        .unwrap();

    provider.push(tool_call(
        "send_email",
        json!({"to": "a@b.c", "body": "thanks", "in_reply_to": "m1"}),
    ));
    let reply = orchestrator.process_message("reply", None).await.unwrap();
    let record = &reply.actions[0];
    assert_eq!(record.action.sub_type, "reply");
    assert!(record.boundaries.iter().any(|b| b.kind == BoundaryKind::Novel));
}

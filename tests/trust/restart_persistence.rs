use std::sync::Arc;

use semblance::security::AutonomyTier;
use semblance::store::{ActionStatus, ApprovalPatternStore, open_pool};
use serde_json::json;
use tempfile::TempDir;

use crate::trust_harness::{RecordingTransport, ScriptedProvider, simple_orchestrator, tool_call};

#[tokio::test]
async fn queued_action_survives_restart_and_can_be_approved() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("state").join("semblance.db");

    let (action_id, conversation_id) = {
        let pool = open_pool(&db_path).await.unwrap();
        let provider = Arc::new(ScriptedProvider::new(vec![tool_call(
            "send_email",
            json!({"to": "landlord@example.com", "body": "Rent sent.", "confidence": 0.9}),
        )]));
        let orchestrator = simple_orchestrator(
            pool.clone(),
            AutonomyTier::Partner,
            provider,
            Arc::new(RecordingTransport::default()),
        );
        let outcome = orchestrator
            .process_message("tell the landlord", None)
            .await
            .unwrap();
        pool.close().await;
        (outcome.actions[0].action.id.clone(), outcome.conversation_id)
    };

    let pool = open_pool(&db_path).await.unwrap();
    let transport = Arc::new(RecordingTransport::default());
    let orchestrator = simple_orchestrator(
        pool.clone(),
        AutonomyTier::Partner,
        Arc::new(ScriptedProvider::default()),
        transport.clone(),
    );
    orchestrator.recover().await.unwrap();

    let pending = orchestrator.get_pending_actions().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, action_id);
    assert_eq!(pending[0].payload, json!({"to": "landlord@example.com", "body": "Rent sent."}));

    let turns = orchestrator.get_conversation(&conversation_id).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].content, "tell the landlord");

    let approved = orchestrator.approve_action(&action_id).await.unwrap();
    assert_eq!(approved.action.status, ActionStatus::Executed);
    assert_eq!(transport.sent()[0].0, action_id);

    let pattern = ApprovalPatternStore::new(pool, 3)
        .get_pattern("email.send", "new_message")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pattern.total_approvals, 1);
}

#[tokio::test]
async fn approval_counters_persist_across_pools() {
    let temp = TempDir::new().unwrap();
    let db_path = temp.path().join("semblance.db");

    {
        let patterns = ApprovalPatternStore::new(open_pool(&db_path).await.unwrap(), 3);
        for _ in 0..3 {
            patterns.record_approval("email.draft", "new_draft").await.unwrap();
        }
        let pattern = patterns
            .get_pattern("email.draft", "new_draft")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pattern.consecutive_approvals, 3);
        assert_eq!(pattern.auto_execute_threshold, 3);
        assert!(pattern.is_routine());
    }

    let patterns = ApprovalPatternStore::new(open_pool(&db_path).await.unwrap(), 3);
    let pattern = patterns
        .record_rejection("email.draft", "new_draft")
        .await
        .unwrap();
    assert_eq!(pattern.consecutive_approvals, 0);
    assert_eq!(pattern.total_approvals, 3);
    assert_eq!(pattern.total_rejections, 1);
    assert!(!patterns.is_novel("email.draft", "new_draft").await.unwrap());
}

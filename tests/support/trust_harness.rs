#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use semblance::config::{AutonomyConfig, BoundaryConfig, OrchestratorConfig};
use semblance::error::TransportError;
use semblance::gateway::{ActionEnvelope, GatewayTransport, SidecarBridge};
use semblance::knowledge::{KnowledgeSearch, NoKnowledge};
use semblance::llm::{ChatProvider, ChatRequest, ChatResponse, ToolCall};
use semblance::security::{AutonomyManager, AutonomyTier};
use semblance::{Orchestrator, OrchestratorDeps};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, split};

/// Model double that plays a fixed script, then answers "Done.".
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ChatResponse>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    pub fn push(&self, response: ChatResponse) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response);
    }
}

impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn chat<'a>(
        &'a self,
        _request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatResponse>> + Send + 'a>> {
        Box::pin(async move {
            let next = self
                .script
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            Ok(next.unwrap_or_else(|| ChatResponse::text_only("Done.")))
        })
    }
}

/// Gateway double that records every envelope it accepts.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<(String, String, Value)> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl GatewayTransport for RecordingTransport {
    fn send_action<'a>(
        &'a self,
        envelope: ActionEnvelope<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((
                    envelope.action_id.to_string(),
                    envelope.action.to_string(),
                    envelope.payload.clone(),
                ));
            Ok(json!({"status": "ok"}))
        })
    }

    fn undo_action<'a>(
        &'a self,
        action_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move { Ok(json!({"status": "undone", "action_id": action_id})) })
    }
}

pub fn tool_call(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse::with_tool_calls(
        "",
        vec![ToolCall {
            id: "call_0".into(),
            name: name.into(),
            arguments,
        }],
    )
}

pub fn orchestrator(
    pool: SqlitePool,
    tier: AutonomyTier,
    provider: Arc<dyn ChatProvider>,
    transport: Arc<dyn GatewayTransport>,
    knowledge: Arc<dyn KnowledgeSearch>,
) -> Orchestrator {
    Orchestrator::new(OrchestratorDeps {
        provider,
        knowledge,
        transport,
        autonomy: Arc::new(AutonomyManager::new(AutonomyConfig {
            default_tier: tier,
            ..AutonomyConfig::default()
        })),
        pool,
        boundaries: BoundaryConfig::default(),
        config: OrchestratorConfig::default(),
    })
}

pub fn simple_orchestrator(
    pool: SqlitePool,
    tier: AutonomyTier,
    provider: Arc<ScriptedProvider>,
    transport: Arc<RecordingTransport>,
) -> Orchestrator {
    orchestrator(pool, tier, provider, transport, Arc::new(NoKnowledge))
}

fn encode(message: &Value) -> Vec<u8> {
    let mut line = message.to_string();
    line.push('\n');
    line.into_bytes()
}

/// In-process stand-in for the sidecar process.
///
/// Executes and undoes every action, answers searches with one canned passage and exits
/// on `shutdown`.
pub fn fake_sidecar() -> Arc<SidecarBridge> {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let (our_read, our_write) = split(ours);
    let (their_read, mut their_write) = split(theirs);

    tokio::spawn(async move {
        let mut lines = BufReader::new(their_read).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].clone();
            let (reply, done) = match request["method"].as_str() {
                Some("action:execute") => (
                    json!({
                        "id": id,
                        "result": {
                            "executed": request["params"]["action"],
                            "action_id": request["params"]["action_id"]
                        }
                    }),
                    false,
                ),
                Some("action:undo") => (
                    json!({
                        "id": id,
                        "result": {"undone": request["params"]["action_id"]}
                    }),
                    false,
                ),
                Some("knowledge:search") => (
                    json!({
                        "id": id,
                        "result": {"results": [{"content": "Rent is due on the 1st", "source": "budget.md"}]}
                    }),
                    false,
                ),
                Some("shutdown") => (json!({"id": id, "result": null}), true),
                _ => (
                    json!({"id": id, "error": {"message": "unknown method"}}),
                    false,
                ),
            };
            if their_write.write_all(&encode(&reply)).await.is_err() || done {
                break;
            }
        }
    });

    Arc::new(SidecarBridge::from_io(
        our_read,
        our_write,
        Duration::from_secs(5),
    ))
}

//! NDJSON bridge to the sidecar process that hosts the gateway and the
//! knowledge index.
//!
//! Wire format, one JSON object per line:
//! - request: `{"id": 7, "method": "action:execute", "params": {...}}`
//! - response: `{"id": 7, "result": ...}` or `{"id": 7, "error": ...}`
//! - event: `{"event": "name", "data": ...}` (unsolicited)

use super::{ActionEnvelope, GatewayTransport};
use crate::config::GatewayConfig;
use crate::error::TransportError;
use crate::knowledge::{KnowledgeSearch, ResultChunk, SearchOptions};
use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;

const METHOD_EXECUTE: &str = "action:execute";
const METHOD_UNDO: &str = "action:undo";
const METHOD_SEARCH: &str = "knowledge:search";
const METHOD_SHUTDOWN: &str = "shutdown";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const EVENT_CAPACITY: usize = 64;

type Reply = std::result::Result<Value, TransportError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Unsolicited notification pushed by the sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarEvent {
    pub name: String,
    pub data: Value,
}

pub struct SidecarBridge {
    writer: tokio::sync::Mutex<BoxedWriter>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<AtomicBool>,
    call_timeout: Duration,
    events: broadcast::Sender<SidecarEvent>,
    reader_task: JoinHandle<()>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl SidecarBridge {
    /// Spawn the configured sidecar and attach to its stdio.
    pub fn spawn(config: &GatewayConfig) -> Result<Self> {
        let command = config
            .sidecar_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .context("gateway.sidecar_command is not set")?;

        let mut child = Command::new(command)
            .args(&config.sidecar_args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn sidecar: {command}"))?;

        let stdin = child.stdin.take().context("sidecar stdin unavailable")?;
        let stdout = child.stdout.take().context("sidecar stdout unavailable")?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "sidecar", "{line}");
                }
            });
        }

        let bridge = Self::attach(
            stdout,
            stdin,
            Duration::from_secs(config.call_timeout_secs),
            Some(child),
        );
        tracing::info!(command, "sidecar started");
        Ok(bridge)
    }

    /// Attach to an already-connected reader/writer pair.
    pub fn from_io<R, W>(reader: R, writer: W, call_timeout: Duration) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::attach(reader, writer, call_timeout, None)
    }

    fn attach<R, W>(reader: R, writer: W, call_timeout: Duration, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let reader_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            Arc::clone(&closed),
            events.clone(),
        ));

        Self {
            writer: tokio::sync::Mutex::new(Box::new(writer)),
            pending,
            next_id: AtomicU64::new(1),
            closed,
            call_timeout,
            events,
            reader_task,
            child: tokio::sync::Mutex::new(child),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SidecarEvent> {
        self.events.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, method: &str, params: Value) -> Reply {
        self.call_with_timeout(method, params, self.call_timeout)
            .await
    }

    async fn call_with_timeout(&self, method: &str, params: Value, limit: Duration) -> Reply {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        // The reader may have drained the map just before the insert.
        if self.is_closed() {
            self.forget(id);
            return Err(TransportError::Closed);
        }

        let mut line = json!({"id": id, "method": method, "params": params}).to_string();
        line.push('\n');

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.forget(id);
            return Err(TransportError::Io(err.to_string()));
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.forget(id);
                tracing::warn!(method, id, "sidecar call timed out");
                Err(TransportError::Timeout {
                    secs: limit.as_secs(),
                })
            }
        }
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    /// Ask the sidecar to exit, then make sure it does.
    pub async fn shutdown(&self) {
        if !self.is_closed()
            && let Err(error) = self
                .call_with_timeout(METHOD_SHUTDOWN, json!({}), SHUTDOWN_GRACE)
                .await
        {
            tracing::debug!(%error, "sidecar shutdown request failed");
        }

        if let Some(mut child) = self.child.lock().await.take()
            && let Err(error) = child.kill().await
        {
            tracing::warn!(%error, "failed to kill sidecar");
        }
        self.reader_task.abort();
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for SidecarBridge {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

async fn read_loop<R>(
    reader: R,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    events: broadcast::Sender<SidecarEvent>,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&line, &pending, &events),
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "sidecar read failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    let waiters: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(TransportError::Closed));
    }
    tracing::info!("sidecar connection closed");
}

fn dispatch_line(line: &str, pending: &PendingMap, events: &broadcast::Sender<SidecarEvent>) {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return;
    }

    let message: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(error) => {
            tracing::warn!(%error, "ignoring malformed sidecar line");
            return;
        }
    };

    if let Some(id) = message.get("id").and_then(Value::as_u64) {
        let waiter = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        let Some(waiter) = waiter else {
            tracing::debug!(id, "sidecar response for unknown or expired request");
            return;
        };
        let reply = match message.get("error") {
            Some(error) if !error.is_null() => Err(TransportError::Rejected(error_message(error))),
            _ => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = waiter.send(reply);
        return;
    }

    if let Some(name) = message.get("event").and_then(Value::as_str) {
        tracing::debug!(event = name, "sidecar event");
        let _ = events.send(SidecarEvent {
            name: name.to_string(),
            data: message.get("data").cloned().unwrap_or(Value::Null),
        });
        return;
    }

    tracing::warn!("sidecar line has neither id nor event");
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| other.to_string(), str::to_string),
    }
}

impl GatewayTransport for SidecarBridge {
    fn send_action<'a>(
        &'a self,
        envelope: ActionEnvelope<'a>,
    ) -> Pin<Box<dyn Future<Output = Reply> + Send + 'a>> {
        Box::pin(async move {
            let params = serde_json::to_value(envelope)
                .map_err(|err| TransportError::Protocol(err.to_string()))?;
            self.call(METHOD_EXECUTE, params).await
        })
    }

    fn undo_action<'a>(
        &'a self,
        action_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Reply> + Send + 'a>> {
        Box::pin(async move { self.call(METHOD_UNDO, json!({"action_id": action_id})).await })
    }
}

impl KnowledgeSearch for SidecarBridge {
    fn search<'a>(
        &'a self,
        query: &'a str,
        options: SearchOptions,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ResultChunk>>> + Send + 'a>> {
        Box::pin(async move {
            let result = self
                .call(METHOD_SEARCH, json!({"query": query, "limit": options.limit}))
                .await?;
            let chunks = match result {
                Value::Object(mut map) => map.remove("results").unwrap_or(Value::Null),
                other => other,
            };
            if chunks.is_null() {
                return Ok(Vec::new());
            }
            serde_json::from_value(chunks).context("decode knowledge search results")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, split};

    /// Bridge plus the sidecar's end of the pipe.
    struct Harness {
        bridge: Arc<SidecarBridge>,
        requests: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        responses: WriteHalf<DuplexStream>,
    }

    impl Harness {
        fn new(timeout: Duration) -> Self {
            let (ours, theirs) = tokio::io::duplex(64 * 1024);
            let (our_read, our_write) = split(ours);
            let (their_read, their_write) = split(theirs);
            Self {
                bridge: Arc::new(SidecarBridge::from_io(our_read, our_write, timeout)),
                requests: BufReader::new(their_read).lines(),
                responses: their_write,
            }
        }

        async fn next_request(&mut self) -> Value {
            let line = self.requests.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn reply(&mut self, message: Value) {
            let mut line = message.to_string();
            line.push('\n');
            self.responses.write_all(line.as_bytes()).await.unwrap();
            self.responses.flush().await.unwrap();
        }
    }

    #[tokio::test]
    async fn send_action_round_trips_result() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let bridge = Arc::clone(&harness.bridge);
        let call = tokio::spawn(async move {
            let payload = json!({"message_ids": ["m1"]});
            bridge
                .send_action(ActionEnvelope {
                    action_id: "a-1",
                    action: "email.archive",
                    payload: &payload,
                })
                .await
        });

        let request = harness.next_request().await;
        assert_eq!(request["method"], METHOD_EXECUTE);
        assert_eq!(request["params"]["action_id"], "a-1");
        assert_eq!(request["params"]["action"], "email.archive");
        harness
            .reply(json!({"id": request["id"], "result": {"archived": 1}}))
            .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, json!({"archived": 1}));
    }

    #[tokio::test]
    async fn undo_action_names_the_action_id() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let bridge = Arc::clone(&harness.bridge);
        let call = tokio::spawn(async move { bridge.undo_action("a-7").await });

        let request = harness.next_request().await;
        assert_eq!(request["method"], METHOD_UNDO);
        assert_eq!(request["params"], json!({"action_id": "a-7"}));
        harness
            .reply(json!({"id": request["id"], "result": {"undone": true}}))
            .await;

        assert_eq!(call.await.unwrap().unwrap(), json!({"undone": true}));
    }

    #[tokio::test]
    async fn error_response_is_rejected() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let bridge = Arc::clone(&harness.bridge);
        let call = tokio::spawn(async move { bridge.call("action:execute", json!({})).await });

        let request = harness.next_request().await;
        harness
            .reply(json!({"id": request["id"], "error": {"message": "smtp down"}}))
            .await;

        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err, TransportError::Rejected("smtp down".into()));
    }

    #[tokio::test]
    async fn out_of_order_responses_reach_their_callers() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let first = {
            let bridge = Arc::clone(&harness.bridge);
            tokio::spawn(async move { bridge.call("first", json!({})).await })
        };
        let first_req = harness.next_request().await;
        let second = {
            let bridge = Arc::clone(&harness.bridge);
            tokio::spawn(async move { bridge.call("second", json!({})).await })
        };
        let second_req = harness.next_request().await;

        harness.reply(json!({"id": second_req["id"], "result": 2})).await;
        harness.reply(json!({"id": first_req["id"], "result": 1})).await;

        assert_eq!(first.await.unwrap().unwrap(), json!(1));
        assert_eq!(second.await.unwrap().unwrap(), json!(2));
    }

    #[tokio::test]
    async fn events_are_broadcast() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let mut events = harness.bridge.subscribe();

        harness
            .reply(json!({"event": "sync:progress", "data": {"pct": 40}}))
            .await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.name, "sync:progress");
        assert_eq!(event.data, json!({"pct": 40}));
    }

    #[tokio::test]
    async fn silent_sidecar_times_out() {
        let mut harness = Harness::new(Duration::from_millis(50));
        let err = harness.bridge.call("action:execute", json!({})).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));

        // A late reply for the expired request is dropped quietly.
        let request = harness.next_request().await;
        harness.reply(json!({"id": request["id"], "result": 1})).await;
    }

    #[tokio::test]
    async fn closed_pipe_fails_pending_and_future_calls() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let bridge = Arc::clone(&harness.bridge);
        let call = tokio::spawn(async move { bridge.call("action:execute", json!({})).await });

        let _ = harness.next_request().await;
        harness.responses.shutdown().await.unwrap();
        drop(harness.responses);

        assert_eq!(call.await.unwrap().unwrap_err(), TransportError::Closed);
        assert!(harness.bridge.is_closed());
        assert_eq!(
            harness.bridge.call("x", json!({})).await.unwrap_err(),
            TransportError::Closed
        );
    }

    #[tokio::test]
    async fn knowledge_search_accepts_wrapped_results() {
        let mut harness = Harness::new(Duration::from_secs(5));
        let bridge = Arc::clone(&harness.bridge);
        let call = tokio::spawn(async move {
            bridge
                .search("passport", SearchOptions { limit: 3 })
                .await
        });

        let request = harness.next_request().await;
        assert_eq!(request["method"], METHOD_SEARCH);
        assert_eq!(request["params"], json!({"query": "passport", "limit": 3}));
        harness
            .reply(json!({
                "id": request["id"],
                "result": {"results": [{"content": "Passport expires 2027", "source": "notes"}]}
            }))
            .await;

        let chunks = call.await.unwrap().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source.as_deref(), Some("notes"));
    }

    #[test]
    fn error_message_prefers_message_field() {
        assert_eq!(error_message(&json!("plain")), "plain");
        assert_eq!(error_message(&json!({"message": "nested"})), "nested");
        assert_eq!(error_message(&json!({"code": 3})), "{\"code\":3}");
    }
}

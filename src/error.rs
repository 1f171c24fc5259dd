use crate::store::{ActionStatus, EscalationStatus};
use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `Semblance`.
///
/// Policy outcomes (autonomy decisions, triggered boundaries) are data and never
/// appear here. Only provider, transport, validation and action-lifecycle
/// failures are exceptional. Store code uses `anyhow::Result` internally for
/// context chains and surfaces through [`SemblanceError::Store`].
#[derive(Debug, Error)]
pub enum SemblanceError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── LLM / Knowledge ─────────────────────────────────────────────────
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    // ── Gateway transport ───────────────────────────────────────────────
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    // ── Pending action lifecycle ────────────────────────────────────────
    #[error("action: {0}")]
    Action(#[from] ActionError),

    // ── Autonomy escalation prompts ─────────────────────────────────────
    #[error("escalation: {0}")]
    Escalation(#[from] EscalationError),

    // ── Malformed tool call from the model ──────────────────────────────
    #[error("validation: {0}")]
    Validation(String),

    // ── Persistence (wraps anyhow for sqlx context chains) ──────────────
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Provider errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider {provider} chat failed: {message}")]
    Chat { provider: String, message: String },

    #[error("knowledge search failed: {0}")]
    Knowledge(String),
}

// ─── Transport errors ────────────────────────────────────────────────────────

/// Failure of the gateway's `send_action`.
///
/// `Clone` so the message can ride along on an action record in a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway io: {0}")]
    Io(String),

    #[error("gateway protocol: {0}")]
    Protocol(String),

    #[error("gateway rejected action: {0}")]
    Rejected(String),

    #[error("gateway timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("gateway connection closed")]
    Closed,
}

// ─── Action lifecycle errors ─────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActionError {
    #[error("action {id} not found")]
    NotFound { id: String },

    #[error("action {id} cannot transition from {status}")]
    InvalidState { id: String, status: ActionStatus },

    #[error("action {id} was already undone")]
    AlreadyUndone { id: String },
}

// ─── Escalation errors ───────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EscalationError {
    #[error("escalation prompt {id} not found")]
    NotFound { id: String },

    #[error("escalation prompt {id} is already {status}")]
    AlreadyResolved { id: String, status: EscalationStatus },
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, SemblanceError>;

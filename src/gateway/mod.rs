//! The single seam through which side effects happen.

pub mod sidecar;

pub use sidecar::{SidecarBridge, SidecarEvent};

use crate::error::TransportError;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// What the gateway receives for one action.
///
/// `action_id` lets the gateway de-duplicate the bounded retries that follow
/// crash recovery.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionEnvelope<'a> {
    pub action_id: &'a str,
    pub action: &'a str,
    pub payload: &'a Value,
}

pub trait GatewayTransport: Send + Sync {
    fn send_action<'a>(
        &'a self,
        envelope: ActionEnvelope<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;

    /// Ask the gateway to reverse an action it already executed.
    fn undo_action<'a>(
        &'a self,
        action_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;
}

/// Transport used when no sidecar is configured: every action fails as
/// unavailable and stays pending.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTransport;

impl GatewayTransport for UnconfiguredTransport {
    fn send_action<'a>(
        &'a self,
        envelope: ActionEnvelope<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            Err(TransportError::Unavailable(format!(
                "no gateway sidecar configured for {}",
                envelope.action
            )))
        })
    }

    fn undo_action<'a>(
        &'a self,
        action_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>> {
        Box::pin(async move {
            Err(TransportError::Unavailable(format!(
                "no gateway sidecar configured to undo {action_id}"
            )))
        })
    }
}

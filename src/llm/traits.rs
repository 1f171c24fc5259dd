use super::types::{ChatRequest, ChatResponse};
use std::future::Future;
use std::pin::Pin;

/// Language-model backend.
pub trait ChatProvider: Send + Sync {
    /// Provider identifier (e.g. "ollama").
    fn name(&self) -> &str;

    fn chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<ChatResponse>> + Send + 'a>>;

    /// Warm up the HTTP connection pool.
    fn warmup(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
        Box::pin(async move { Ok(()) })
    }
}

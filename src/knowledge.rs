//! Read-only knowledge search consumed by the orchestrator for context.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: u32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { limit: 5 }
    }
}

/// One retrieved passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultChunk {
    pub content: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
}

pub trait KnowledgeSearch: Send + Sync {
    fn search<'a>(
        &'a self,
        query: &'a str,
        options: SearchOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ResultChunk>>> + Send + 'a>>;
}

/// Search backend for setups without an index. Always empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledge;

impl KnowledgeSearch for NoKnowledge {
    fn search<'a>(
        &'a self,
        _query: &'a str,
        _options: SearchOptions,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ResultChunk>>> + Send + 'a>> {
        Box::pin(async move { Ok(Vec::new()) })
    }
}

/// Render chunks as a numbered context block for the model.
pub fn format_chunks(chunks: &[ResultChunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| match &chunk.source {
            Some(source) => format!("[{}] ({source}) {}", idx + 1, chunk.content),
            None => format!("[{}] {}", idx + 1, chunk.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub mod http_client;
pub mod ollama;
pub mod traits;
pub mod types;

pub use ollama::OllamaProvider;
pub use traits::ChatProvider;
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ChatRole, ResponseFormat, ToolCall, ToolSpec,
};

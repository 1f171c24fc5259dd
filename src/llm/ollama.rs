use super::http_client::{api_error, build_provider_client_with_timeout};
use super::traits::ChatProvider;
use super::types::{
    ChatMessage, ChatRequest as LlmRequest, ChatResponse as LlmResponse, ChatRole, ResponseFormat,
    ToolCall, ToolSpec,
};
use crate::config::ProviderConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// Local Ollama server reached over `POST /api/chat`.
pub struct OllamaProvider {
    base_url: String,
    model: String,
    temperature: f64,
    client: Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: Options,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OutgoingCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_name: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct OutgoingCall<'a> {
    function: OutgoingFunction<'a>,
}

#[derive(Debug, Serialize)]
struct OutgoingFunction<'a> {
    name: &'a str,
    arguments: &'a Value,
}

#[derive(Debug, Serialize)]
struct Tool<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    function: ToolFunction<'a>,
}

#[derive(Debug, Serialize)]
struct ToolFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize)]
struct Options {
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<IncomingCall>,
}

#[derive(Debug, Deserialize)]
struct IncomingCall {
    function: IncomingFunction,
}

#[derive(Debug, Deserialize)]
struct IncomingFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            client: build_provider_client_with_timeout(config.request_timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request<'a>(&'a self, request: &'a LlmRequest) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: request.messages.iter().map(to_wire_message).collect(),
            stream: false,
            options: Options {
                temperature: request.temperature.unwrap_or(self.temperature),
            },
            tools: request.tools.iter().map(to_wire_tool).collect(),
            format: match request.format {
                Some(ResponseFormat::Json) => Some("json"),
                Some(ResponseFormat::Text) | None => None,
            },
        }
    }

    async fn call_api(&self, request: &LlmRequest) -> anyhow::Result<ChatResponse> {
        let body = self.build_request(request);
        let url = format!("{}/api/chat", self.base_url);

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let err = api_error("Ollama", response).await;
            anyhow::bail!("{err}. Is Ollama running? (ollama serve)");
        }

        response.json().await.map_err(anyhow::Error::msg)
    }
}

impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn chat<'a>(
        &'a self,
        request: &'a LlmRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<LlmResponse>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.call_api(request).await?;
            Ok(LlmResponse {
                message: response.message.content,
                tool_calls: response
                    .message
                    .tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(idx, call)| ToolCall {
                        // Ollama does not assign call ids.
                        id: format!("call_{idx}"),
                        name: call.function.name,
                        arguments: normalize_arguments(call.function.arguments),
                    })
                    .collect(),
                model: response.model,
                input_tokens: response.prompt_eval_count,
                output_tokens: response.eval_count,
            })
        })
    }
}

fn to_wire_message(message: &ChatMessage) -> Message<'_> {
    Message {
        role: match message.role {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        },
        content: &message.content,
        tool_calls: message
            .tool_calls
            .iter()
            .map(|call| OutgoingCall {
                function: OutgoingFunction {
                    name: &call.name,
                    arguments: &call.arguments,
                },
            })
            .collect(),
        tool_name: message.tool_name.as_deref(),
    }
}

fn to_wire_tool(tool: &ToolSpec) -> Tool<'_> {
    Tool {
        kind: "function",
        function: ToolFunction {
            name: &tool.name,
            description: &tool.description,
            parameters: &tool.parameters,
        },
    }
}

/// Some models return arguments as a JSON-encoded string.
fn normalize_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(url: &str) -> OllamaProvider {
        OllamaProvider::new(&ProviderConfig {
            ollama_url: url.to_string(),
            model: "llama3.2".into(),
            ..ProviderConfig::default()
        })
    }

    #[test]
    fn custom_url_trailing_slash() {
        let p = provider("http://192.168.1.100:11434/");
        assert_eq!(p.base_url, "http://192.168.1.100:11434");
    }

    #[test]
    fn request_serializes_tools_and_format() {
        let p = provider("http://localhost:11434");
        let request = LlmRequest {
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hello")],
            tools: vec![ToolSpec {
                name: "search_files".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }],
            format: Some(ResponseFormat::Json),
            temperature: Some(0.0),
        };
        let json = serde_json::to_value(p.build_request(&request)).unwrap();

        assert_eq!(json["stream"], false);
        assert_eq!(json["format"], "json");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "search_files");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["options"]["temperature"], 0.0);
    }

    #[test]
    fn request_without_tools_omits_them() {
        let p = provider("http://localhost:11434");
        let request = LlmRequest {
            messages: vec![ChatMessage::user("hello")],
            ..LlmRequest::default()
        };
        let json = serde_json::to_value(p.build_request(&request)).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("format").is_none());
    }

    #[test]
    fn tool_messages_carry_tool_name() {
        let call = ToolCall {
            id: "call_0".into(),
            name: "search_files".into(),
            arguments: json!({"query": "x"}),
        };
        let json = serde_json::to_value(to_wire_message(&ChatMessage::tool_result(&call, "[]")))
            .unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_name"], "search_files");
    }

    #[test]
    fn string_arguments_are_decoded() {
        assert_eq!(
            normalize_arguments(json!("{\"ids\":[1,2]}")),
            json!({"ids": [1, 2]})
        );
        assert_eq!(normalize_arguments(json!("not json")), json!("not json"));
        assert_eq!(normalize_arguments(Value::Null), json!({}));
    }

    #[tokio::test]
    async fn chat_parses_tool_calls_and_assigns_ids() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(json!({"model": "llama3.2", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "model": "llama3.2",
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [
                        {"function": {"name": "archive_emails", "arguments": {"message_ids": ["m1"]}}},
                        {"function": {"name": "send_email", "arguments": "{\"to\":\"a@b\"}"}}
                    ]
                },
                "prompt_eval_count": 12,
                "eval_count": 7
            })))
            .mount(&server)
            .await;

        let p = provider(&server.uri());
        let request = LlmRequest {
            messages: vec![ChatMessage::user("tidy my inbox")],
            ..LlmRequest::default()
        };
        let response = p.chat(&request).await.unwrap();

        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_0");
        assert_eq!(response.tool_calls[0].name, "archive_emails");
        assert_eq!(response.tool_calls[1].id, "call_1");
        assert_eq!(response.tool_calls[1].arguments, json!({"to": "a@b"}));
        assert_eq!(response.input_tokens, Some(12));
        assert_eq!(response.output_tokens, Some(7));
    }

    #[tokio::test]
    async fn chat_returns_plain_text() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "message": {"role": "assistant", "content": "Hello from Ollama!"}
            })))
            .mount(&server)
            .await;

        let response = provider(&server.uri())
            .chat(&LlmRequest {
                messages: vec![ChatMessage::user("hi")],
                ..LlmRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(response.message, "Hello from Ollama!");
        assert!(!response.has_tool_calls());
    }

    #[tokio::test]
    async fn chat_error_status_surfaces_hint() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(
                ResponseTemplate::new(404).set_body_string("{\"error\":\"model not found\"}"),
            )
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .chat(&LlmRequest::default())
            .await
            .unwrap_err()
            .to_string();
        assert!(err.contains("Ollama API error"));
        assert!(err.contains("model not found"));
        assert!(err.contains("ollama serve"));
    }
}

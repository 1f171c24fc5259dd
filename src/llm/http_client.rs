use reqwest::Client;
use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

pub fn build_provider_client_with_timeout(timeout_secs: u64) -> Client {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Error for a non-success response, with the body truncated.
pub async fn api_error(provider: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read provider error body>".to_string());
    anyhow::anyhow!("{provider} API error ({status}): {}", truncate(&body))
}

fn truncate(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_API_ERROR_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_API_ERROR_CHARS).collect();
    out.push_str("...");
    out
}

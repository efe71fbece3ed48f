pub mod deepseek;
pub mod openai;
pub mod openai_messages_adapter;

pub use deepseek::{DeepseekConfig, DeepseekReasoningModel};
pub use openai::{OpenAIConfig, OpenAIExecutionModel};

use crate::error::{DeepAgentError, Result};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub(crate) fn build_client(provider: &str, timeout: Option<Duration>) -> Result<Client> {
    let mut client_builder = Client::builder();

    if let Some(timeout) = timeout {
        client_builder = client_builder.timeout(timeout);
    }

    client_builder.build().map_err(|e| {
        DeepAgentError::ConfigError(format!("failed to build {} HTTP client: {}", provider, e))
    })
}

/// Statuses meaning the backend cannot serve us right now, as opposed to a
/// request it rejected.
fn backend_unavailable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    ) || status.is_server_error()
}

/// POST a chat completion request and check the status.
///
/// Transport failures, auth failures, rate limits and server errors are
/// reported as the backend being unavailable; other rejections are protocol
/// errors.
pub(crate) async fn post_chat_completion(
    client: &Client,
    provider: &str,
    base_url: &str,
    api_key: &str,
    body: &Value,
) -> Result<Response> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    debug!(provider = provider, url = %url, "Posting chat completion");

    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| DeepAgentError::unavailable(provider, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        let message = format!("API error: {} - {}", status, error_text);
        return Err(if backend_unavailable(status) {
            DeepAgentError::unavailable(provider, message)
        } else {
            DeepAgentError::protocol(provider, message)
        });
    }

    Ok(response)
}

/// Read a response body as JSON; anything else is a protocol error.
pub(crate) async fn read_json(provider: &str, response: Response) -> Result<Value> {
    let text = response
        .text()
        .await
        .map_err(|e| DeepAgentError::unavailable(provider, e.to_string()))?;

    serde_json::from_str(&text)
        .map_err(|e| DeepAgentError::protocol(provider, format!("invalid JSON body: {}", e)))
}

/// The `message` object of the first choice.
pub(crate) fn first_message<'a>(provider: &str, body: &'a Value) -> Result<&'a Value> {
    let message = &body["choices"][0]["message"];
    if message.is_object() {
        Ok(message)
    } else {
        Err(DeepAgentError::protocol(provider, "response has no choices[0].message"))
    }
}

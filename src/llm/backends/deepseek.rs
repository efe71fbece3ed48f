//! DeepSeek R1 reasoning backend.
//!
//! Talks to any OpenAI-compatible chat completions endpoint serving an R1-style
//! model. The model's chain-of-thought becomes the reasoning output; it is never
//! offered tools.

use crate::error::{DeepAgentError, Result};
use crate::llm::backend::{ChunkStream, ModelSettings, ReasoningBackend, StreamChunk};
use crate::llm::backends::openai_messages_adapter::{
    adapt_messages_for_reasoning, REASONING_CLOSE, REASONING_OPEN,
};
use crate::llm::backends::{build_client, first_message, post_chat_completion, read_json};
use crate::llm::conversation::Conversation;
use crate::llm::models::ReasoningOutput;
use crate::llm::usage::Usage;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const DEEPSEEK_PROVIDER: &str = "deepseek";

/// Configuration for connecting to a DeepSeek R1 endpoint.
#[derive(Debug, Clone)]
pub struct DeepseekConfig {
    pub model_name: String,
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<std::time::Duration>,
    /// Preamble sent as the system message; `None` means the default (empty).
    pub system_prompt: Option<String>,
    /// Settings applied when a call does not override them.
    pub settings: ModelSettings,
}

impl Default for DeepseekConfig {
    fn default() -> Self {
        Self {
            model_name: std::env::var("DEEPSEEK_R1_MODEL_NAME")
                .unwrap_or_else(|_| "deepseek-reasoner".to_string()),
            api_key: std::env::var("DEEPSEEK_R1_API_KEY").unwrap_or_default(),
            base_url: std::env::var("DEEPSEEK_R1_BASE_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com".to_string()),
            timeout: None,
            system_prompt: None,
            settings: ModelSettings::default(),
        }
    }
}

/// Reasoning backend for DeepSeek R1.
pub struct DeepseekReasoningModel {
    client: Client,
    config: DeepseekConfig,
    system_prompt: String,
}

impl DeepseekReasoningModel {
    pub fn new(
        model_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(DeepseekConfig {
            model_name: model_name.into(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            ..Default::default()
        })
    }

    pub fn with_config(config: DeepseekConfig) -> Result<Self> {
        let client = build_client(DEEPSEEK_PROVIDER, config.timeout)?;
        let system_prompt = config
            .system_prompt
            .clone()
            .filter(|prompt| !prompt.is_empty())
            .unwrap_or_else(|| Self::default_system_prompt().to_string());

        Ok(Self {
            client,
            config,
            system_prompt,
        })
    }

    /// Replace the preamble sent with every reasoning request.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// R1 is recommended to run without any system prompt.
    pub fn default_system_prompt() -> &'static str {
        ""
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    fn build_body(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        stream: bool,
    ) -> Value {
        let settings = self.config.settings.merged(settings);

        let mut body = serde_json::json!({
            "model": self.config.model_name,
            "messages": adapt_messages_for_reasoning(conversation, &self.system_prompt),
        });

        if let Some(max_tokens) = settings.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if settings.temperature.is_some() || settings.top_p.is_some() {
            warn!(
                model = %self.config.model_name,
                temperature = ?settings.temperature,
                top_p = ?settings.top_p,
                "Reasoning model does not support sampling parameters, ignoring them"
            );
        }

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        body
    }
}

/// Split a `<think>...</think>` block off the front of `content`.
///
/// Some hosts inline R1's chain-of-thought into the answer instead of a
/// separate field.
fn split_think_block(content: &str) -> Option<(&str, &str)> {
    let rest = content.trim_start().strip_prefix(REASONING_OPEN)?;
    let end = rest.find(REASONING_CLOSE)?;
    Some((&rest[..end], &rest[end + REASONING_CLOSE.len()..]))
}

fn reasoning_from_message(message: &Value) -> Result<ReasoningOutput> {
    let content = message["content"].as_str();
    let mut reasoning_content = message["reasoning_content"].as_str();
    let mut answer = content;

    if reasoning_content.map_or(true, |r| r.trim().is_empty()) {
        if let Some((thought, rest)) = content.and_then(split_think_block) {
            reasoning_content = Some(thought);
            answer = Some(rest);
        }
    }

    ReasoningOutput::from_parts(reasoning_content, answer).ok_or_else(|| {
        DeepAgentError::protocol(DEEPSEEK_PROVIDER, "response carried no reasoning or content")
    })
}

#[async_trait]
impl ReasoningBackend for DeepseekReasoningModel {
    fn model_name(&self) -> &str {
        &self.config.model_name
    }

    fn provider(&self) -> &str {
        DEEPSEEK_PROVIDER
    }

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
    ) -> Result<(ReasoningOutput, Usage)> {
        info!("Delegating to DeepSeek for reasoning");
        debug!(
            model = %self.config.model_name,
            message_count = conversation.len(),
            "Building reasoning request"
        );

        let body = self.build_body(conversation, settings, false);
        let response = post_chat_completion(
            &self.client,
            DEEPSEEK_PROVIDER,
            &self.config.base_url,
            &self.config.api_key,
            &body,
        )
        .await?;
        let response_body = read_json(DEEPSEEK_PROVIDER, response).await?;

        let output = reasoning_from_message(first_message(DEEPSEEK_PROVIDER, &response_body)?)?;
        let usage = if response_body["usage"].is_object() {
            Usage::from_openai(&response_body["usage"])
        } else {
            Usage::single(0, 0)
        };

        debug!(chars = output.text.len(), total_tokens = usage.total_tokens, "Reasoning received");
        Ok((output, usage))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn request_stream<'a>(
        &'a self,
        conversation: &'a Conversation,
        settings: Option<&'a ModelSettings>,
    ) -> Result<ChunkStream<'a>> {
        let body = self.build_body(conversation, settings, true);

        Ok(Box::pin(async_stream::stream! {
            info!("Starting DeepSeek streaming reasoning");

            let response = match post_chat_completion(
                &self.client,
                DEEPSEEK_PROVIDER,
                &self.config.base_url,
                &self.config.api_key,
                &body,
            )
            .await
            {
                Ok(r) => r,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut events = response.bytes_stream().eventsource();

            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(DeepAgentError::unavailable(
                            DEEPSEEK_PROVIDER,
                            format!("SSE stream error: {}", e),
                        ));
                        return;
                    }
                };
                if event.data == "[DONE]" {
                    break;
                }
                if event.data.trim().is_empty() {
                    continue;
                }

                let json: Value = match serde_json::from_str(&event.data) {
                    Ok(json) => json,
                    Err(e) => {
                        yield Err(DeepAgentError::protocol(
                            DEEPSEEK_PROVIDER,
                            format!("malformed streaming chunk: {}", e),
                        ));
                        return;
                    }
                };
                if let Some(message) = json["error"]["message"].as_str() {
                    yield Err(DeepAgentError::unavailable(DEEPSEEK_PROVIDER, message));
                    return;
                }

                let delta = &json["choices"][0]["delta"];
                if let Some(reasoning) = delta["reasoning_content"].as_str() {
                    if !reasoning.is_empty() {
                        yield Ok(StreamChunk::Reasoning(reasoning.to_string()));
                    }
                }
                if let Some(content) = delta["content"].as_str() {
                    if !content.is_empty() {
                        yield Ok(StreamChunk::Content(content.to_string()));
                    }
                }
                if json["usage"].is_object() {
                    yield Ok(StreamChunk::Usage(Usage::from_openai(&json["usage"])));
                }
            }
        }))
    }
}

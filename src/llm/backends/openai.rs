//! OpenAI execution backend.
//!
//! Sends the conversation (reasoning folded in) with the caller's tools and the
//! result tool, and classifies the reply as a final result, tool invocations or
//! text.

use crate::error::{DeepAgentError, Result};
use crate::llm::backend::{ChunkStream, ExecutionBackend, ModelSettings, StreamChunk};
use crate::llm::backends::openai_messages_adapter::{
    adapt_messages_to_openai, convert_tool_calls, parse_tool_call,
};
use crate::llm::backends::{build_client, first_message, post_chat_completion, read_json};
use crate::llm::conversation::Conversation;
use crate::llm::models::{ExecutionResult, FinalResult, LlmToolCall};
use crate::llm::tools::RequestParameters;
use crate::llm::usage::Usage;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const OPENAI_PROVIDER: &str = "openai";

/// Configuration for connecting to OpenAI API.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Option<std::time::Duration>,
    /// Settings applied when a call does not override them.
    pub settings: ModelSettings,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            base_url: std::env::var("OPENAI_API_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            timeout: None,
            settings: ModelSettings::default(),
        }
    }
}

/// Execution backend for OpenAI chat models with tool calling.
pub struct OpenAIExecutionModel {
    client: Client,
    model_name: String,
    config: OpenAIConfig,
}

impl OpenAIExecutionModel {
    /// Create a backend with configuration from the environment.
    pub fn new(model_name: impl Into<String>) -> Result<Self> {
        Self::with_config(model_name, OpenAIConfig::default())
    }

    pub fn with_config(model_name: impl Into<String>, config: OpenAIConfig) -> Result<Self> {
        let client = build_client(OPENAI_PROVIDER, config.timeout)?;
        Ok(Self {
            client,
            model_name: model_name.into(),
            config,
        })
    }

    pub fn with_api_key_and_base_url(
        model_name: impl Into<String>,
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_config(
            model_name,
            OpenAIConfig {
                api_key: api_key.into(),
                base_url: base_url.into(),
                ..Default::default()
            },
        )
    }

    fn build_body(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
        stream: bool,
    ) -> Result<Value> {
        let settings = self.config.settings.merged(settings);
        let tools = params.all_tools();

        if tools.is_empty() && !params.allow_text_result {
            return Err(DeepAgentError::ConfigError(
                "text results are disallowed but no tools were offered".to_string(),
            ));
        }

        let mut body = serde_json::json!({
            "model": self.model_name,
            "messages": adapt_messages_to_openai(conversation),
        });

        if let Some(temperature) = settings.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = settings.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(top_p) = settings.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }

        if !tools.is_empty() {
            body["tools"] = serde_json::to_value(&tools)?;
            body["tool_choice"] =
                serde_json::json!(if params.allow_text_result { "auto" } else { "required" });
        }

        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({"include_usage": true});
        }

        Ok(body)
    }
}

/// Classify a model reply against what the request allowed.
///
/// A result tool call wins over function tool calls made alongside it.
pub(crate) fn interpret_reply(
    content: Option<&str>,
    tool_calls: Vec<LlmToolCall>,
    params: &RequestParameters,
) -> Result<ExecutionResult> {
    if !tool_calls.is_empty() {
        if let Some(unknown) = tool_calls
            .iter()
            .find(|c| !params.is_result_tool(&c.name) && !params.is_function_tool(&c.name))
        {
            return Err(DeepAgentError::SchemaViolation(format!(
                "model called undeclared tool `{}`",
                unknown.name
            )));
        }

        if let Some(call) = tool_calls.iter().find(|c| params.is_result_tool(&c.name)) {
            let value = Value::Object(call.arguments.clone());
            if let Some(spec) = &params.result {
                let missing = spec.missing_properties(&value).unwrap_or_default();
                if !missing.is_empty() {
                    return Err(DeepAgentError::SchemaViolation(format!(
                        "result tool `{}` is missing required properties: {}",
                        call.name,
                        missing.join(", ")
                    )));
                }
            }
            return Ok(ExecutionResult::Final(FinalResult {
                tool_name: call.name.clone(),
                tool_call_id: call.id.clone(),
                value,
            }));
        }

        return Ok(ExecutionResult::ToolCalls(tool_calls));
    }

    match content.filter(|c| !c.trim().is_empty()) {
        Some(text) if params.allow_text_result => Ok(ExecutionResult::Text(text.to_string())),
        Some(_) => Err(DeepAgentError::SchemaViolation(
            "model answered in text without calling a tool".to_string(),
        )),
        None => Err(DeepAgentError::protocol(
            OPENAI_PROVIDER,
            "response carried neither content nor tool calls",
        )),
    }
}

#[async_trait]
impl ExecutionBackend for OpenAIExecutionModel {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn provider(&self) -> &str {
        OPENAI_PROVIDER
    }

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
    ) -> Result<(ExecutionResult, Usage)> {
        info!("Delegating to OpenAI for execution");
        debug!(
            model = %self.model_name,
            message_count = conversation.len(),
            tool_count = params.tools.len(),
            has_result = params.result.is_some(),
            "Building execution request"
        );

        let body = self.build_body(conversation, settings, params, false)?;
        let response = post_chat_completion(
            &self.client,
            OPENAI_PROVIDER,
            &self.config.base_url,
            &self.config.api_key,
            &body,
        )
        .await?;
        let response_body = read_json(OPENAI_PROVIDER, response).await?;
        let message = first_message(OPENAI_PROVIDER, &response_body)?;

        let tool_calls = match message["tool_calls"].as_array() {
            Some(calls) => convert_tool_calls(OPENAI_PROVIDER, calls)?,
            None => vec![],
        };
        let result = interpret_reply(message["content"].as_str(), tool_calls, params)?;

        let usage = if response_body["usage"].is_object() {
            Usage::from_openai(&response_body["usage"])
        } else {
            Usage::single(0, 0)
        };

        Ok((result, usage))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn request_stream<'a>(
        &'a self,
        conversation: &'a Conversation,
        settings: Option<&'a ModelSettings>,
        params: &'a RequestParameters,
    ) -> Result<ChunkStream<'a>> {
        let body = self.build_body(conversation, settings, params, true)?;

        Ok(Box::pin(async_stream::stream! {
            info!("Starting OpenAI streaming execution");

            let response = match post_chat_completion(
                &self.client,
                OPENAI_PROVIDER,
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
            let mut content = String::new();
            let mut tool_calls_accumulator: BTreeMap<u64, ToolCallAccumulator> = BTreeMap::new();
            let mut usage: Option<Usage> = None;

            // Text is streamed live only when it can be the answer.
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(DeepAgentError::unavailable(
                            OPENAI_PROVIDER,
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
                            OPENAI_PROVIDER,
                            format!("malformed streaming chunk: {}", e),
                        ));
                        return;
                    }
                };
                if let Some(message) = json["error"]["message"].as_str() {
                    yield Err(DeepAgentError::unavailable(OPENAI_PROVIDER, message));
                    return;
                }

                if json["usage"].is_object() {
                    usage = Some(Usage::from_openai(&json["usage"]));
                }

                let delta = &json["choices"][0]["delta"];

                if let Some(text) = delta["content"].as_str() {
                    if !text.is_empty() {
                        content.push_str(text);
                        if params.allow_text_result {
                            yield Ok(StreamChunk::Content(text.to_string()));
                        }
                    }
                }

                if let Some(tool_calls) = delta["tool_calls"].as_array() {
                    for (position, tc) in tool_calls.iter().enumerate() {
                        let index = tc["index"].as_u64().unwrap_or(position as u64);
                        let acc = tool_calls_accumulator.entry(index).or_default();

                        // First fragment carries id and name
                        if let Some(id) = tc["id"].as_str() {
                            acc.id = Some(id.to_string());
                        }
                        if let Some(name) = tc["function"]["name"].as_str() {
                            acc.name = Some(name.to_string());
                        }
                        if let Some(args) = tc["function"]["arguments"].as_str() {
                            acc.arguments.push_str(args);
                        }
                    }
                }
            }

            let calls = match build_complete_tool_calls(&tool_calls_accumulator) {
                Ok(calls) => calls,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            debug!(tool_calls = calls.len(), content_len = content.len(), "Streamed execution reply complete");

            match interpret_reply(Some(&content), calls.clone(), params) {
                Ok(ExecutionResult::Text(_)) => {}
                Ok(_) => {
                    yield Ok(StreamChunk::ToolCalls(calls));
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
            yield Ok(StreamChunk::Usage(usage.unwrap_or_else(|| Usage::single(0, 0))));
        }))
    }
}

/// Accumulator for streaming tool calls.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Build complete tool calls from accumulators, in index order.
///
/// A fragment that never received a name cannot be dispatched.
fn build_complete_tool_calls(
    accumulators: &BTreeMap<u64, ToolCallAccumulator>,
) -> Result<Vec<LlmToolCall>> {
    accumulators
        .iter()
        .map(|(index, acc)| {
            let name = acc.name.as_deref().ok_or_else(|| {
                DeepAgentError::protocol(
                    OPENAI_PROVIDER,
                    format!("streamed tool call {} never received a name", index),
                )
            })?;
            parse_tool_call(acc.id.as_deref(), name, &acc.arguments)
        })
        .collect()
}

//! Conversion between [`Conversation`] and the OpenAI chat message format.

use crate::error::{DeepAgentError, Result};
use crate::llm::conversation::Conversation;
use crate::llm::models::{LlmMessage, LlmToolCall};
use serde_json::{json, Map, Value};

/// Markers bounding an injected reasoning segment.
pub const REASONING_OPEN: &str = "<think>";
pub const REASONING_CLOSE: &str = "</think>";

/// Render reasoning text between the reasoning markers.
pub fn wrap_reasoning(text: &str) -> String {
    format!("{}\n{}\n{}", REASONING_OPEN, text, REASONING_CLOSE)
}

fn tool_call_to_openai(call: &LlmToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": Value::Object(call.arguments.clone()).to_string()
        }
    })
}

/// Adapt a conversation for a tool-calling chat model.
///
/// Consecutive tool-call segments become one assistant message, as the API
/// expects parallel calls to share a message.
pub fn adapt_messages_to_openai(conversation: &Conversation) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    for msg in conversation {
        match msg {
            LlmMessage::System { content, .. } => {
                result.push(json!({"role": "system", "content": content}));
            }
            LlmMessage::User { content, .. } => {
                result.push(json!({"role": "user", "content": content}));
            }
            LlmMessage::Assistant {
                content, reasoning, ..
            } => {
                let content = if *reasoning {
                    wrap_reasoning(content)
                } else {
                    content.clone()
                };
                result.push(json!({"role": "assistant", "content": content}));
            }
            LlmMessage::ToolCall { call, .. } => {
                let formatted = tool_call_to_openai(call);
                let appended = result
                    .last_mut()
                    .filter(|last| last["role"] == "assistant" && last["content"].is_null())
                    .and_then(|last| last["tool_calls"].as_array_mut())
                    .map(|calls| calls.push(formatted.clone()))
                    .is_some();

                if !appended {
                    result.push(json!({
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [formatted]
                    }));
                }
            }
            LlmMessage::ToolReturn {
                tool_call_id,
                content,
                ..
            } => {
                result.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content
                }));
            }
        }
    }

    result
}

fn push_merged(result: &mut Vec<Value>, role: &str, text: String) {
    if let Some(last) = result.last_mut() {
        if last["role"] == role {
            let merged = format!("{}\n\n{}", last["content"].as_str().unwrap_or(""), text);
            last["content"] = Value::String(merged);
            return;
        }
    }
    result.push(json!({"role": role, "content": text}));
}

/// Adapt a conversation for a text-only reasoning model.
///
/// Caller instructions are replaced by `system_prompt` (omitted when empty).
/// Earlier reasoning segments are dropped, tool traffic is rendered as text,
/// and consecutive messages of the same role are merged because reasoning
/// endpoints reject successive user or assistant turns.
pub fn adapt_messages_for_reasoning(conversation: &Conversation, system_prompt: &str) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();

    if !system_prompt.is_empty() {
        result.push(json!({"role": "system", "content": system_prompt}));
    }

    for msg in conversation {
        match msg {
            LlmMessage::System { .. } => {}
            LlmMessage::Assistant {
                reasoning: true, ..
            } => {}
            LlmMessage::User { content, .. } => push_merged(&mut result, "user", content.clone()),
            LlmMessage::Assistant { content, .. } => {
                push_merged(&mut result, "assistant", content.clone())
            }
            LlmMessage::ToolCall { call, .. } => push_merged(
                &mut result,
                "assistant",
                format!(
                    "Called tool `{}` with arguments {}",
                    call.name,
                    Value::Object(call.arguments.clone())
                ),
            ),
            LlmMessage::ToolReturn {
                tool_name, content, ..
            } => push_merged(
                &mut result,
                "user",
                format!("Tool `{}` returned: {}", tool_name, content),
            ),
        }
    }

    result
}

/// Convert tool calls from OpenAI format to internal format.
///
/// Calls without an id get a generated correlation token.
pub fn convert_tool_calls(provider: &str, tool_calls: &[Value]) -> Result<Vec<LlmToolCall>> {
    tool_calls
        .iter()
        .map(|tc| {
            let name = tc["function"]["name"]
                .as_str()
                .ok_or_else(|| DeepAgentError::protocol(provider, "tool call without a name"))?;
            let id = tc["id"].as_str().filter(|id| !id.is_empty());
            parse_tool_call(id, name, tc["function"]["arguments"].as_str().unwrap_or(""))
        })
        .collect()
}

/// Build a tool call from its wire parts.
pub(crate) fn parse_tool_call(id: Option<&str>, name: &str, arguments: &str) -> Result<LlmToolCall> {
    let arguments: Map<String, Value> = if arguments.trim().is_empty() {
        Map::new()
    } else {
        serde_json::from_str(arguments).map_err(|e| {
            DeepAgentError::SchemaViolation(format!(
                "arguments for tool `{}` are not a JSON object: {}",
                name, e
            ))
        })?
    };

    Ok(LlmToolCall {
        id: id
            .map(String::from)
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
        name: name.to_string(),
        arguments,
    })
}

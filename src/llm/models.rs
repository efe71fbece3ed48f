use crate::error::{DeepAgentError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Discriminant of an [`LlmMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    System,
    User,
    Assistant,
    ToolCall,
    ToolReturn,
}

/// Tool invocation requested by a model.
///
/// `id` is an opaque correlation token; the matching tool result must carry
/// the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

/// One segment of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LlmMessage {
    System {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    User {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    Assistant {
        content: String,
        /// Set on the segment a composite model injects with reasoning output.
        #[serde(default)]
        reasoning: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ToolCall {
        call: LlmToolCall,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
    ToolReturn {
        tool_call_id: String,
        tool_name: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<DateTime<Utc>>,
    },
}

impl LlmMessage {
    /// Create a system (instruction) message
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
            timestamp: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
            timestamp: None,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            reasoning: false,
            timestamp: None,
        }
    }

    /// Create the assistant segment that carries reasoning output.
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: content.into(),
            reasoning: true,
            timestamp: None,
        }
    }

    pub fn tool_call(call: LlmToolCall) -> Self {
        Self::ToolCall {
            call,
            timestamp: None,
        }
    }

    pub fn tool_return(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::ToolReturn {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            timestamp: None,
        }
    }

    /// Stamp this message with a time.
    pub fn with_timestamp(mut self, at: DateTime<Utc>) -> Self {
        match &mut self {
            Self::System { timestamp, .. }
            | Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolCall { timestamp, .. }
            | Self::ToolReturn { timestamp, .. } => *timestamp = Some(at),
        }
        self
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::System { .. } => MessageKind::System,
            Self::User { .. } => MessageKind::User,
            Self::Assistant { .. } => MessageKind::Assistant,
            Self::ToolCall { .. } => MessageKind::ToolCall,
            Self::ToolReturn { .. } => MessageKind::ToolReturn,
        }
    }

    /// Text content of the message. Tool calls render their arguments as JSON.
    pub fn content(&self) -> String {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. }
            | Self::ToolReturn { content, .. } => content.clone(),
            Self::ToolCall { call, .. } => Value::Object(call.arguments.clone()).to_string(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::System { timestamp, .. }
            | Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolCall { timestamp, .. }
            | Self::ToolReturn { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, Self::Assistant { reasoning: true, .. })
    }
}

/// Text produced by a reasoning backend for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasoningOutput {
    pub text: String,
}

impl ReasoningOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Choose the reasoning text from a provider reply.
    ///
    /// Reasoning models report chain-of-thought separately from the answer;
    /// the chain-of-thought wins when present, the answer is the fallback.
    pub fn from_parts(reasoning_content: Option<&str>, content: Option<&str>) -> Option<Self> {
        [reasoning_content, content]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
            .map(Self::new)
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// A result tool call that satisfied the requested result schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalResult {
    pub tool_name: String,
    pub tool_call_id: String,
    pub value: Value,
}

/// Answer of an execution backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Structured value conforming to the requested result schema.
    Final(FinalResult),
    /// Function tools the surrounding framework has to run.
    ToolCalls(Vec<LlmToolCall>),
    /// Plain text, only produced when the request allows a text result.
    Text(String),
}

impl ExecutionResult {
    pub fn final_value(&self) -> Option<&Value> {
        match self {
            Self::Final(result) => Some(&result.value),
            Self::ToolCalls(_) | Self::Text(_) => None,
        }
    }

    /// Deserialize the final structured value into `T`.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Self::Final(result) => Ok(serde_json::from_value(result.value)?),
            Self::ToolCalls(calls) => Err(DeepAgentError::SchemaViolation(format!(
                "expected a final result, got {} tool call(s)",
                calls.len()
            ))),
            Self::Text(_) => Err(DeepAgentError::SchemaViolation(
                "expected a final result, got text".to_string(),
            )),
        }
    }
}

use crate::error::{DeepAgentError, Result};
use crate::llm::conversation::Conversation;
use crate::llm::models::{ExecutionResult, LlmToolCall, ReasoningOutput};
use crate::llm::tools::RequestParameters;
use crate::llm::usage::Usage;
use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;

/// Sampling settings for one request.
///
/// Unset fields fall back to the backend's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl ModelSettings {
    /// Layer `overrides` on top of these settings.
    pub fn merged(&self, overrides: Option<&ModelSettings>) -> ModelSettings {
        match overrides {
            None => self.clone(),
            Some(o) => ModelSettings {
                temperature: o.temperature.or(self.temperature),
                max_tokens: o.max_tokens.or(self.max_tokens),
                top_p: o.top_p.or(self.top_p),
            },
        }
    }
}

/// Incremental output of a streamed request.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Chain-of-thought text.
    Reasoning(String),
    /// Answer text.
    Content(String),
    /// Complete tool calls, emitted once their fragments are assembled.
    ToolCalls(Vec<LlmToolCall>),
    /// Final accounting for the request.
    Usage(Usage),
}

pub type ChunkStream<'a> = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send + 'a>>;

/// Model that produces free-form reasoning text and never calls tools.
#[async_trait]
pub trait ReasoningBackend: Send + Sync {
    fn model_name(&self) -> &str;

    /// Provider tag, e.g. `deepseek`.
    fn provider(&self) -> &str;

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
    ) -> Result<(ReasoningOutput, Usage)>;

    fn supports_streaming(&self) -> bool {
        false
    }

    /// Stream reasoning text as it is generated.
    ///
    /// Fails before any network call when streaming is not supported.
    fn request_stream<'a>(
        &'a self,
        _conversation: &'a Conversation,
        _settings: Option<&'a ModelSettings>,
    ) -> Result<ChunkStream<'a>> {
        Err(DeepAgentError::UnsupportedOperation(format!(
            "streamed requests are not supported by {}",
            self.model_name()
        )))
    }
}

/// Model that answers with a structured result or tool invocations.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn model_name(&self) -> &str;

    fn provider(&self) -> &str;

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
    ) -> Result<(ExecutionResult, Usage)>;

    fn supports_streaming(&self) -> bool {
        false
    }

    fn request_stream<'a>(
        &'a self,
        _conversation: &'a Conversation,
        _settings: Option<&'a ModelSettings>,
        _params: &'a RequestParameters,
    ) -> Result<ChunkStream<'a>> {
        Err(DeepAgentError::UnsupportedOperation(format!(
            "streamed requests are not supported by {}",
            self.model_name()
        )))
    }
}

#[async_trait]
impl<T: ReasoningBackend + ?Sized> ReasoningBackend for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
    ) -> Result<(ReasoningOutput, Usage)> {
        (**self).request(conversation, settings).await
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }

    fn request_stream<'a>(
        &'a self,
        conversation: &'a Conversation,
        settings: Option<&'a ModelSettings>,
    ) -> Result<ChunkStream<'a>> {
        (**self).request_stream(conversation, settings)
    }
}

#[async_trait]
impl<T: ExecutionBackend + ?Sized> ExecutionBackend for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn provider(&self) -> &str {
        (**self).provider()
    }

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
    ) -> Result<(ExecutionResult, Usage)> {
        (**self).request(conversation, settings, params).await
    }

    fn supports_streaming(&self) -> bool {
        (**self).supports_streaming()
    }

    fn request_stream<'a>(
        &'a self,
        conversation: &'a Conversation,
        settings: Option<&'a ModelSettings>,
        params: &'a RequestParameters,
    ) -> Result<ChunkStream<'a>> {
        (**self).request_stream(conversation, settings, params)
    }
}

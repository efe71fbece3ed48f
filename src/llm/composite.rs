//! Two-phase composite model.
//!
//! A [`CompositeModel`] sends the conversation to a reasoning backend, folds the
//! reasoning text back into a copy of the conversation as a single reasoning
//! segment, and lets an execution backend produce the structured answer or tool
//! calls. Each call walks [`CallState`] once, in order:
//!
//! ```text
//! Start -> ReasoningInFlight -> ReasoningDone -> ExecutionInFlight -> ExecutionDone
//!                  \                                     \
//!                   `--------------> Failed <-------------'
//! ```

use crate::error::{CallPhase, DeepAgentError, Result};
use crate::llm::backend::{
    ChunkStream, ExecutionBackend, ModelSettings, ReasoningBackend, StreamChunk,
};
use crate::llm::conversation::Conversation;
use crate::llm::models::{ExecutionResult, LlmMessage, ReasoningOutput};
use crate::llm::tools::RequestParameters;
use crate::llm::usage::Usage;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Combined name and provider tag of a composite model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdentity {
    pub name: String,
    pub provider: String,
}

/// Progress of a single composite call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Start,
    ReasoningInFlight,
    ReasoningDone,
    ExecutionInFlight,
    ExecutionDone,
    Failed,
}

impl CallState {
    pub fn can_advance_to(self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Start, ReasoningInFlight)
                | (ReasoningInFlight, ReasoningDone)
                | (ReasoningDone, ExecutionInFlight)
                | (ExecutionInFlight, ExecutionDone)
                | (ReasoningInFlight, Failed)
                | (ReasoningDone, Failed)
                | (ExecutionInFlight, Failed)
        )
    }

    /// The next state, or `None` when the transition is not allowed.
    pub fn advance(self, next: CallState) -> Option<CallState> {
        self.can_advance_to(next).then_some(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::ExecutionDone | CallState::Failed)
    }
}

/// Tracks one call through [`CallState`].
struct CallTracker<'a> {
    model: &'a str,
    state: CallState,
}

impl<'a> CallTracker<'a> {
    fn new(model: &'a str) -> Self {
        Self {
            model,
            state: CallState::Start,
        }
    }

    fn advance(&mut self, next: CallState) {
        match self.state.advance(next) {
            Some(state) => {
                debug!(model = self.model, from = ?self.state, to = ?state, "Composite call transition");
                self.state = state;
            }
            None => {
                debug_assert!(false, "illegal transition {:?} -> {:?}", self.state, next);
                warn!(model = self.model, from = ?self.state, to = ?next, "Rejected composite call transition");
            }
        }
    }

    /// Mark the call failed and wrap `source` with the phase it failed in.
    fn fail(&mut self, phase: CallPhase, source: DeepAgentError, usage: Usage) -> DeepAgentError {
        self.advance(CallState::Failed);
        if usage.total_tokens > 0 {
            warn!(
                model = self.model,
                phase = %phase,
                spent_tokens = usage.total_tokens,
                error = %source,
                "Composite call failed after spending tokens"
            );
        } else {
            warn!(model = self.model, phase = %phase, error = %source, "Composite call failed");
        }
        DeepAgentError::Composition {
            phase,
            source: Box::new(source),
            usage,
        }
    }

    fn cancel(&mut self, phase: CallPhase, usage: Usage) -> DeepAgentError {
        self.advance(CallState::Failed);
        info!(model = self.model, phase = %phase, "Composite call cancelled");
        DeepAgentError::Cancelled { phase, usage }
    }
}

/// Await `future` unless `cancel` fires first.
///
/// An already-cancelled token wins without polling `future`.
async fn until_cancelled<F: Future>(
    future: F,
    cancel: Option<&CancellationToken>,
) -> Option<F::Output> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            output = future => Some(output),
        },
        None => Some(future.await),
    }
}

/// Sum both phases and keep the per-phase breakdown in `details`.
fn merge_usage(reasoning: &Usage, execution: &Usage) -> Usage {
    let mut merged = Usage::default();
    merged.incr(reasoning);
    merged.incr(execution);
    reasoning.record_breakdown("reasoning", &mut merged.details);
    execution.record_breakdown("execution", &mut merged.details);
    merged
}

/// A backend call happened, whatever the backend reported.
fn counted(mut usage: Usage) -> Usage {
    usage.requests = usage.requests.max(1);
    usage
}

fn empty_reasoning(provider: &str) -> DeepAgentError {
    DeepAgentError::protocol(provider, "reasoning backend returned no text")
}

/// Reasoning model and execution model acting as one.
pub struct CompositeModel<R, E> {
    reasoning: R,
    execution: E,
    name: String,
    provider: String,
}

impl<R: ReasoningBackend, E: ExecutionBackend> CompositeModel<R, E> {
    pub fn new(reasoning: R, execution: E) -> Self {
        let name = format!("{}-{}", reasoning.model_name(), execution.model_name());
        let provider = format!("{}-{}", reasoning.provider(), execution.provider());
        Self {
            reasoning,
            execution,
            name,
            provider,
        }
    }

    pub fn identity(&self) -> ModelIdentity {
        ModelIdentity {
            name: self.name.clone(),
            provider: self.provider.clone(),
        }
    }

    pub fn reasoning_model(&self) -> &R {
        &self.reasoning
    }

    pub fn execution_model(&self) -> &E {
        &self.execution
    }

    /// Like [`ExecutionBackend::request`], but stops when `cancel` fires.
    ///
    /// A call cancelled before reasoning completes never reaches the execution
    /// backend; one cancelled later drops the in-flight execution request.
    pub async fn request_with_cancellation(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
        cancel: &CancellationToken,
    ) -> Result<(ExecutionResult, Usage)> {
        self.run(conversation, settings, params, Some(cancel)).await
    }

    async fn run(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
        cancel: Option<&CancellationToken>,
    ) -> Result<(ExecutionResult, Usage)> {
        let mut call = CallTracker::new(&self.name);

        call.advance(CallState::ReasoningInFlight);
        info!(
            model = %self.name,
            message_count = conversation.len(),
            "Starting reasoning phase"
        );

        // The reasoning backend keeps its own preamble and sampling defaults.
        let reasoning = self.reasoning.request(conversation, None);
        let (output, reasoning_usage) = match until_cancelled(reasoning, cancel).await {
            None => return Err(call.cancel(CallPhase::Reasoning, Usage::default())),
            Some(Err(e)) => return Err(call.fail(CallPhase::Reasoning, e, Usage::default())),
            Some(Ok((output, usage))) => (output, counted(usage)),
        };

        if output.is_empty() {
            let source = empty_reasoning(self.reasoning.provider());
            return Err(call.fail(CallPhase::Reasoning, source, reasoning_usage));
        }
        call.advance(CallState::ReasoningDone);

        let augmented = match conversation.extended(LlmMessage::reasoning(output.text)) {
            Ok(augmented) => augmented,
            Err(e) => return Err(call.fail(CallPhase::Reasoning, e, reasoning_usage)),
        };

        call.advance(CallState::ExecutionInFlight);
        info!(
            model = %self.name,
            reasoning_tokens = reasoning_usage.total_tokens,
            "Starting execution phase"
        );

        let execution = self.execution.request(&augmented, settings, params);
        let (result, execution_usage) = match until_cancelled(execution, cancel).await {
            None => return Err(call.cancel(CallPhase::Execution, reasoning_usage)),
            Some(Err(e)) => return Err(call.fail(CallPhase::Execution, e, reasoning_usage)),
            Some(Ok((result, usage))) => (result, counted(usage)),
        };

        call.advance(CallState::ExecutionDone);
        let usage = merge_usage(&reasoning_usage, &execution_usage);
        info!(
            model = %self.name,
            requests = usage.requests,
            total_tokens = usage.total_tokens,
            "Composite call complete"
        );

        Ok((result, usage))
    }
}

#[async_trait]
impl<R: ReasoningBackend, E: ExecutionBackend> ExecutionBackend for CompositeModel<R, E> {
    fn model_name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> &str {
        &self.provider
    }

    async fn request(
        &self,
        conversation: &Conversation,
        settings: Option<&ModelSettings>,
        params: &RequestParameters,
    ) -> Result<(ExecutionResult, Usage)> {
        self.run(conversation, settings, params, None).await
    }

    fn supports_streaming(&self) -> bool {
        self.reasoning.supports_streaming() && self.execution.supports_streaming()
    }

    /// Stream reasoning deltas, then the execution output, then merged usage.
    ///
    /// Both backends must stream; otherwise this fails before any request.
    fn request_stream<'a>(
        &'a self,
        conversation: &'a Conversation,
        settings: Option<&'a ModelSettings>,
        params: &'a RequestParameters,
    ) -> Result<ChunkStream<'a>> {
        if !self.supports_streaming() {
            return Err(DeepAgentError::UnsupportedOperation(format!(
                "streamed requests need both backends to stream ({} streams: {}, {} streams: {})",
                self.reasoning.model_name(),
                self.reasoning.supports_streaming(),
                self.execution.model_name(),
                self.execution.supports_streaming()
            )));
        }

        Ok(Box::pin(async_stream::stream! {
            let mut call = CallTracker::new(&self.name);
            call.advance(CallState::ReasoningInFlight);
            info!(model = %self.name, "Starting streamed reasoning phase");

            let mut reasoning_text = String::new();
            let mut answer_text = String::new();
            let mut reasoning_usage = Usage::default();

            let mut reasoning_stream = match self.reasoning.request_stream(conversation, None) {
                Ok(stream) => stream,
                Err(e) => {
                    yield Err(call.fail(CallPhase::Reasoning, e, Usage::default()));
                    return;
                }
            };
            while let Some(chunk) = reasoning_stream.next().await {
                match chunk {
                    Ok(StreamChunk::Reasoning(text)) => {
                        reasoning_text.push_str(&text);
                        yield Ok(StreamChunk::Reasoning(text));
                    }
                    Ok(StreamChunk::Content(text)) => {
                        answer_text.push_str(&text);
                        yield Ok(StreamChunk::Reasoning(text));
                    }
                    Ok(StreamChunk::Usage(usage)) => reasoning_usage.incr(&usage),
                    Ok(StreamChunk::ToolCalls(calls)) => {
                        warn!(count = calls.len(), "Reasoning backend streamed tool calls, ignoring them");
                    }
                    Err(e) => {
                        yield Err(call.fail(CallPhase::Reasoning, e, reasoning_usage.clone()));
                        return;
                    }
                }
            }
            drop(reasoning_stream);
            let reasoning_usage = counted(reasoning_usage);

            let Some(output) = ReasoningOutput::from_parts(Some(&reasoning_text), Some(&answer_text)) else {
                let source = empty_reasoning(self.reasoning.provider());
                yield Err(call.fail(CallPhase::Reasoning, source, reasoning_usage));
                return;
            };
            call.advance(CallState::ReasoningDone);

            let augmented = match conversation.extended(LlmMessage::reasoning(output.text)) {
                Ok(augmented) => augmented,
                Err(e) => {
                    yield Err(call.fail(CallPhase::Reasoning, e, reasoning_usage));
                    return;
                }
            };

            call.advance(CallState::ExecutionInFlight);
            info!(model = %self.name, "Starting streamed execution phase");

            let mut execution_usage = Usage::default();
            let mut execution_stream = match self.execution.request_stream(&augmented, settings, params) {
                Ok(stream) => stream,
                Err(e) => {
                    yield Err(call.fail(CallPhase::Execution, e, reasoning_usage));
                    return;
                }
            };
            while let Some(chunk) = execution_stream.next().await {
                match chunk {
                    Ok(StreamChunk::Usage(usage)) => execution_usage.incr(&usage),
                    Ok(other) => {
                        yield Ok(other);
                    }
                    Err(e) => {
                        yield Err(call.fail(CallPhase::Execution, e, reasoning_usage.clone()));
                        return;
                    }
                }
            }

            call.advance(CallState::ExecutionDone);
            yield Ok(StreamChunk::Usage(merge_usage(&reasoning_usage, &counted(execution_usage))));
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::backends::{DeepseekReasoningModel, OpenAIExecutionModel};
    use crate::llm::models::{FinalResult, LlmToolCall};
    use crate::llm::tools::ResultSpec;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const QUESTION: &str = "9.11 and 9.8, which is greater?";
    const THOUGHT: &str = "9.8 is greater because tenths digit 8 > 1";

    enum ReasonerScript {
        Text(&'static str),
        Unavailable,
    }

    struct ScriptedReasoner {
        name: &'static str,
        script: ReasonerScript,
        streaming: bool,
        calls: AtomicUsize,
        seen: Mutex<Vec<Conversation>>,
    }

    impl ScriptedReasoner {
        fn new(name: &'static str, script: ReasonerScript) -> Self {
            Self {
                name,
                script,
                streaming: false,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(vec![]),
            }
        }

        fn streaming(mut self) -> Self {
            self.streaming = true;
            self
        }
    }

    #[async_trait]
    impl ReasoningBackend for ScriptedReasoner {
        fn model_name(&self) -> &str {
            self.name
        }

        fn provider(&self) -> &str {
            "test-reasoning"
        }

        async fn request(
            &self,
            conversation: &Conversation,
            _settings: Option<&ModelSettings>,
        ) -> Result<(ReasoningOutput, Usage)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(conversation.clone());
            match self.script {
                ReasonerScript::Text(text) => Ok((ReasoningOutput::new(text), Usage::single(14, 40))),
                ReasonerScript::Unavailable => Err(DeepAgentError::BackendUnavailable {
                    provider: "test-reasoning".to_string(),
                    message: "connection refused".to_string(),
                }),
            }
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        fn request_stream<'a>(
            &'a self,
            conversation: &'a Conversation,
            _settings: Option<&'a ModelSettings>,
        ) -> Result<ChunkStream<'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(conversation.clone());
            let chunks = match self.script {
                ReasonerScript::Text(_) => vec![
                    Ok(StreamChunk::Reasoning("9.8 is greater because ".to_string())),
                    Ok(StreamChunk::Reasoning("tenths digit 8 > 1".to_string())),
                    Ok(StreamChunk::Usage(Usage::single(14, 40))),
                ],
                ReasonerScript::Unavailable => vec![
                    Ok(StreamChunk::Reasoning("9.8 is".to_string())),
                    Err(DeepAgentError::BackendUnavailable {
                        provider: "test-reasoning".to_string(),
                        message: "connection reset".to_string(),
                    }),
                ],
            };
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    enum ExecutorScript {
        Respond(ExecutionResult),
        Fail,
        Hang,
    }

    struct RecordingExecutor {
        name: &'static str,
        script: ExecutorScript,
        streaming: bool,
        calls: AtomicUsize,
        seen: Mutex<Vec<Conversation>>,
    }

    impl RecordingExecutor {
        fn new(name: &'static str, script: ExecutorScript) -> Self {
            Self {
                name,
                script,
                streaming: false,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(vec![]),
            }
        }

        fn streaming(mut self) -> Self {
            self.streaming = true;
            self
        }
    }

    #[async_trait]
    impl ExecutionBackend for RecordingExecutor {
        fn model_name(&self) -> &str {
            self.name
        }

        fn provider(&self) -> &str {
            "test-execution"
        }

        async fn request(
            &self,
            conversation: &Conversation,
            _settings: Option<&ModelSettings>,
            _params: &RequestParameters,
        ) -> Result<(ExecutionResult, Usage)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(conversation.clone());
            match &self.script {
                ExecutorScript::Respond(result) => Ok((result.clone(), Usage::single(60, 12))),
                ExecutorScript::Fail => Err(DeepAgentError::SchemaViolation(
                    "model answered in text without calling a tool".to_string(),
                )),
                ExecutorScript::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Err(DeepAgentError::UnsupportedOperation("should be cancelled".to_string()))
                }
            }
        }

        fn supports_streaming(&self) -> bool {
            self.streaming
        }

        fn request_stream<'a>(
            &'a self,
            conversation: &'a Conversation,
            _settings: Option<&'a ModelSettings>,
            _params: &'a RequestParameters,
        ) -> Result<ChunkStream<'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(conversation.clone());
            let chunks = match &self.script {
                ExecutorScript::Fail => vec![Err(DeepAgentError::SchemaViolation(
                    "model answered in text without calling a tool".to_string(),
                ))],
                _ => vec![
                    Ok(StreamChunk::ToolCalls(vec![result_call()])),
                    Ok(StreamChunk::Usage(Usage::single(60, 12))),
                ],
            };
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    fn result_call() -> LlmToolCall {
        LlmToolCall {
            id: "call_1".to_string(),
            name: "final_result".to_string(),
            arguments: json!({"result": 9.8}).as_object().cloned().unwrap(),
        }
    }

    fn final_answer() -> ExecutionResult {
        ExecutionResult::Final(FinalResult {
            tool_name: "final_result".to_string(),
            tool_call_id: "call_1".to_string(),
            value: json!({"result": 9.8}),
        })
    }

    fn question() -> Conversation {
        Conversation::from_messages(vec![
            LlmMessage::system("You are a helpful assistant. You must use a tool."),
            LlmMessage::user(QUESTION),
        ])
        .unwrap()
    }

    fn params() -> RequestParameters {
        RequestParameters::default().with_result(ResultSpec::new(json!({
            "type": "object",
            "properties": {"result": {"type": "number"}},
            "required": ["result"]
        })))
    }

    fn composite(
        reasoning: ReasonerScript,
        execution: ExecutorScript,
    ) -> CompositeModel<Arc<ScriptedReasoner>, Arc<RecordingExecutor>> {
        CompositeModel::new(
            Arc::new(ScriptedReasoner::new("R", reasoning)),
            Arc::new(RecordingExecutor::new("E", execution)),
        )
    }

    #[test]
    fn test_identity() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Fail);

        let identity = model.identity();
        assert_eq!(identity.name, "R-E");
        assert_eq!(identity.provider, "test-reasoning-test-execution");
        assert_eq!(model.model_name(), "R-E");
        assert_eq!(model.provider(), "test-reasoning-test-execution");
    }

    #[test]
    fn test_call_state_transitions() {
        use CallState::*;

        assert!(Start.can_advance_to(ReasoningInFlight));
        assert!(ReasoningInFlight.can_advance_to(ReasoningDone));
        assert!(ReasoningDone.can_advance_to(ExecutionInFlight));
        assert!(ExecutionInFlight.can_advance_to(ExecutionDone));
        assert!(ReasoningInFlight.can_advance_to(Failed));
        assert!(ExecutionInFlight.can_advance_to(Failed));

        assert!(!Start.can_advance_to(ExecutionInFlight));
        assert!(!ReasoningInFlight.can_advance_to(ExecutionInFlight));
        assert!(!ExecutionDone.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(ReasoningInFlight));

        assert_eq!(Start.advance(ReasoningInFlight), Some(ReasoningInFlight));
        assert_eq!(ReasoningDone.advance(ExecutionDone), None);

        assert!(ExecutionDone.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!ReasoningDone.is_terminal());
    }

    #[tokio::test]
    async fn test_greater_number_scenario() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Respond(final_answer()));

        let (result, usage) = tokio_test::assert_ok!(model.request(&question(), None, &params()).await);

        assert_eq!(result.final_value(), Some(&json!({"result": 9.8})));
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.request_tokens, 74);
        assert_eq!(usage.response_tokens, 52);
        assert_eq!(usage.total_tokens, 54 + 72);
        assert_eq!(usage.details["reasoning_total_tokens"], 54);
        assert_eq!(usage.details["execution_total_tokens"], 72);
        assert_eq!(usage.details["reasoning_requests"], 1);
    }

    #[tokio::test]
    async fn test_execution_sees_exactly_one_reasoning_segment() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Respond(final_answer()));
        let original = question();

        model.request(&original, None, &params()).await.unwrap();

        let seen = model.execution_model().seen.lock().unwrap();
        let augmented = &seen[0];
        assert_eq!(augmented.len(), original.len() + 1);
        assert_eq!(&augmented.messages()[..original.len()], original.messages());

        let segment = augmented.last().unwrap();
        assert!(segment.is_reasoning());
        assert_eq!(segment.content(), THOUGHT);
    }

    #[tokio::test]
    async fn test_reasoning_receives_unmodified_conversation() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Respond(final_answer()));
        let original = question();

        model.request(&original, None, &params()).await.unwrap();

        let seen = model.reasoning_model().seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], original);
        assert_eq!(original.len(), 2);
    }

    #[tokio::test]
    async fn test_reasoning_failure_never_calls_execution() {
        let model = composite(ReasonerScript::Unavailable, ExecutorScript::Respond(final_answer()));

        let err = tokio_test::assert_err!(model.request(&question(), None, &params()).await);

        assert!(err.to_string().contains("reasoning phase"));
        match &err {
            DeepAgentError::Composition { phase, source, .. } => {
                assert_eq!(*phase, CallPhase::Reasoning);
                assert!(matches!(**source, DeepAgentError::BackendUnavailable { .. }));
            }
            other => panic!("Expected Composition, got {:?}", other),
        }
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_reasoning_never_calls_execution() {
        let model = composite(ReasonerScript::Text("  \n"), ExecutorScript::Respond(final_answer()));

        let err = model.request(&question(), None, &params()).await.unwrap_err();

        assert_eq!(err.phase(), Some(CallPhase::Reasoning));
        assert_eq!(err.usage().map(|u| u.total_tokens), Some(54));
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_execution_failure_keeps_reasoning_usage() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Fail);

        let err = model.request(&question(), None, &params()).await.unwrap_err();

        assert_eq!(err.phase(), Some(CallPhase::Execution));
        let usage = err.usage().unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.total_tokens, 54);
        match err {
            DeepAgentError::Composition { source, .. } => {
                assert!(matches!(*source, DeepAgentError::SchemaViolation(_)));
            }
            other => panic!("Expected Composition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_counted_even_without_reported_usage() {
        struct SilentReasoner;

        #[async_trait]
        impl ReasoningBackend for SilentReasoner {
            fn model_name(&self) -> &str {
                "silent"
            }

            fn provider(&self) -> &str {
                "test"
            }

            async fn request(
                &self,
                _conversation: &Conversation,
                _settings: Option<&ModelSettings>,
            ) -> Result<(ReasoningOutput, Usage)> {
                Ok((ReasoningOutput::new(THOUGHT), Usage::default()))
            }
        }

        let model = CompositeModel::new(
            SilentReasoner,
            RecordingExecutor::new("E", ExecutorScript::Respond(final_answer())),
        );

        let (_, usage) = model.request(&question(), None, &params()).await.unwrap();
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.total_tokens, 72);
    }

    #[tokio::test]
    async fn test_stream_unsupported_before_any_call() {
        let model = CompositeModel::new(
            Arc::new(ScriptedReasoner::new("R", ReasonerScript::Text(THOUGHT)).streaming()),
            Arc::new(RecordingExecutor::new("E", ExecutorScript::Respond(final_answer()))),
        );
        let conversation = question();
        let params = params();

        let result = model.request_stream(&conversation, None, &params);

        assert!(matches!(result, Err(DeepAgentError::UnsupportedOperation(_))));
        assert_eq!(model.reasoning_model().calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_end_to_end() {
        let model = CompositeModel::new(
            Arc::new(ScriptedReasoner::new("R", ReasonerScript::Text(THOUGHT)).streaming()),
            Arc::new(
                RecordingExecutor::new("E", ExecutorScript::Respond(final_answer())).streaming(),
            ),
        );
        let conversation = question();
        let params = params();

        let chunks: Vec<StreamChunk> = model
            .request_stream(&conversation, None, &params)
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], StreamChunk::Reasoning("9.8 is greater because ".to_string()));
        assert_eq!(chunks[2], StreamChunk::ToolCalls(vec![result_call()]));
        match &chunks[3] {
            StreamChunk::Usage(usage) => {
                assert_eq!(usage.requests, 2);
                assert_eq!(usage.total_tokens, 126);
            }
            other => panic!("Expected Usage, got {:?}", other),
        }

        let seen = model.execution_model().seen.lock().unwrap();
        assert_eq!(seen[0].last().unwrap().content(), THOUGHT);
    }

    #[tokio::test]
    async fn test_stream_reasoning_failure_never_calls_execution() {
        let model = CompositeModel::new(
            Arc::new(ScriptedReasoner::new("R", ReasonerScript::Unavailable).streaming()),
            Arc::new(
                RecordingExecutor::new("E", ExecutorScript::Respond(final_answer())).streaming(),
            ),
        );
        let conversation = question();
        let params = params();

        let chunks: Vec<_> = model
            .request_stream(&conversation, None, &params)
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        match &chunks[1] {
            Err(DeepAgentError::Composition { phase, source, .. }) => {
                assert_eq!(*phase, CallPhase::Reasoning);
                assert!(matches!(**source, DeepAgentError::BackendUnavailable { .. }));
            }
            other => panic!("Expected Composition, got {:?}", other),
        }
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_execution_failure_keeps_reasoning_usage() {
        let model = CompositeModel::new(
            Arc::new(ScriptedReasoner::new("R", ReasonerScript::Text(THOUGHT)).streaming()),
            Arc::new(RecordingExecutor::new("E", ExecutorScript::Fail).streaming()),
        );
        let conversation = question();
        let params = params();

        let chunks: Vec<_> = model
            .request_stream(&conversation, None, &params)
            .unwrap()
            .collect()
            .await;

        let err = chunks.into_iter().last().unwrap().unwrap_err();
        assert_eq!(err.phase(), Some(CallPhase::Execution));
        let usage = err.usage().unwrap();
        assert_eq!(usage.requests, 1);
        assert_eq!(usage.total_tokens, 54);
    }

    #[tokio::test]
    async fn test_stream_schema_violation_with_http_backends() {
        let mut reasoning_server = mockito::Server::new_async().await;
        let _reasoning_mock = reasoning_server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"tenths digit 8 > 1\"}}]}\n\n",
                "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":14,\"completion_tokens\":40,\"total_tokens\":54}}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let mut execution_server = mockito::Server::new_async().await;
        let _execution_mock = execution_server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"choices\":[{\"delta\":{\"content\":\"9.8 is bigger\"},\"finish_reason\":\"stop\"}]}\n\n",
                "data: [DONE]\n\n",
            ))
            .create_async()
            .await;

        let model = CompositeModel::new(
            DeepseekReasoningModel::new("deepseek-reasoner", "r-key", reasoning_server.url())
                .unwrap(),
            OpenAIExecutionModel::with_api_key_and_base_url(
                "gpt-4o-mini",
                "e-key",
                execution_server.url(),
            )
            .unwrap(),
        );
        let conversation = question();
        let params = params();

        let chunks: Vec<_> = model
            .request_stream(&conversation, None, &params)
            .unwrap()
            .collect()
            .await;

        assert!(!chunks
            .iter()
            .any(|c| matches!(c, Ok(StreamChunk::Usage(_)) | Ok(StreamChunk::Content(_)))));
        match chunks.last() {
            Some(Err(DeepAgentError::Composition { phase, source, usage })) => {
                assert_eq!(*phase, CallPhase::Execution);
                assert!(matches!(**source, DeepAgentError::SchemaViolation(_)));
                assert_eq!(usage.total_tokens, 54);
            }
            other => panic!("Expected Composition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_reasoning_never_starts() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Respond(final_answer()));
        let token = CancellationToken::new();
        token.cancel();

        let err = model
            .request_with_cancellation(&question(), None, &params(), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, DeepAgentError::Cancelled { phase: CallPhase::Reasoning, .. }));
        assert_eq!(model.reasoning_model().calls.load(Ordering::SeqCst), 0);
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_during_execution() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Hang);
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            model.request_with_cancellation(&question(), None, &params(), &token),
        )
        .await
        .expect("cancellation should end the call")
        .unwrap_err();

        match err {
            DeepAgentError::Cancelled { phase, usage } => {
                assert_eq!(phase, CallPhase::Execution);
                assert_eq!(usage.total_tokens, 54);
            }
            other => panic!("Expected Cancelled, got {:?}", other),
        }
        assert_eq!(model.execution_model().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_share_state() {
        let model = composite(ReasonerScript::Text(THOUGHT), ExecutorScript::Respond(final_answer()));
        let first = question();
        let second = Conversation::from_messages(vec![LlmMessage::user("2 or 3?")]).unwrap();
        let params = params();

        let (a, b) = tokio::join!(
            model.request(&first, None, &params),
            model.request(&second, None, &params)
        );

        assert_eq!(a.unwrap().1.requests, 2);
        assert_eq!(b.unwrap().1.requests, 2);

        let seen = model.execution_model().seen.lock().unwrap();
        let mut lengths: Vec<_> = seen.iter().map(Conversation::len).collect();
        lengths.sort();
        assert_eq!(lengths, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_with_http_backends() {
        let mut reasoning_server = mockito::Server::new_async().await;
        let reasoning_mock = reasoning_server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({
                "messages": [{"role": "user", "content": QUESTION}]
            })))
            .with_status(200)
            .with_body(format!(
                r#"{{"choices":[{{"message":{{"reasoning_content":"{}","content":"9.8"}}}}],
                    "usage":{{"prompt_tokens":14,"completion_tokens":40,"total_tokens":54}}}}"#,
                THOUGHT
            ))
            .create_async()
            .await;

        let mut execution_server = mockito::Server::new_async().await;
        let execution_mock = execution_server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::Regex("<think>".to_string()),
                mockito::Matcher::Regex("tenths digit 8 > 1".to_string()),
                mockito::Matcher::Regex("You must use a tool".to_string()),
                mockito::Matcher::PartialJson(json!({"tool_choice": "required"})),
            ]))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"final_result","arguments":"{\"result\": 9.8}"}}]}}],
                           "usage":{"prompt_tokens":60,"completion_tokens":12,"total_tokens":72}}"#)
            .create_async()
            .await;

        let model = CompositeModel::new(
            DeepseekReasoningModel::new("deepseek-reasoner", "r-key", reasoning_server.url())
                .unwrap(),
            OpenAIExecutionModel::with_api_key_and_base_url(
                "gpt-4o-mini",
                "e-key",
                execution_server.url(),
            )
            .unwrap(),
        );

        let (result, usage) = model.request(&question(), None, &params()).await.unwrap();

        reasoning_mock.assert_async().await;
        execution_mock.assert_async().await;
        assert_eq!(model.identity().name, "deepseek-reasoner-gpt-4o-mini");
        assert_eq!(model.identity().provider, "deepseek-openai");
        assert_eq!(result.final_value(), Some(&json!({"result": 9.8})));
        assert_eq!(usage.requests, 2);
        assert_eq!(usage.total_tokens, 126);
    }
}

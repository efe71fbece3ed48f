pub mod error;
pub mod llm;

pub use error::{CallPhase, DeepAgentError, Result};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::error::{CallPhase, DeepAgentError, Result};
    pub use crate::llm::backends::{DeepseekReasoningModel, OpenAIExecutionModel};
    pub use crate::llm::{
        CompositeModel, Conversation, ExecutionBackend, ExecutionResult, LlmMessage,
        ModelSettings, ReasoningBackend, RequestParameters, ResultSpec, StreamChunk, Usage,
    };
}

pub mod backend;
pub mod backends;
pub mod composite;
pub mod conversation;
pub mod models;
pub mod tools;
pub mod usage;

pub use backend::{ChunkStream, ExecutionBackend, ModelSettings, ReasoningBackend, StreamChunk};
pub use composite::{CallState, CompositeModel, ModelIdentity};
pub use conversation::Conversation;
pub use models::{
    ExecutionResult, FinalResult, LlmMessage, LlmToolCall, MessageKind, ReasoningOutput,
};
pub use tools::{FunctionDescriptor, RequestParameters, ResultSpec, ToolDescriptor};
pub use usage::Usage;

//! Error types and result aliases for the deepagent crate.
//!
//! [`DeepAgentError`] separates failures by where they happened: a backend that
//! could not be reached, a backend that answered with something unparseable, an
//! execution model that did not produce a conforming result, or a composite call
//! that failed in one of its two phases.

use crate::llm::usage::Usage;
use std::fmt;
use thiserror::Error;

/// The two stages of a composite call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Reasoning,
    Execution,
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallPhase::Reasoning => write!(f, "reasoning"),
            CallPhase::Execution => write!(f, "execution"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeepAgentError {
    #[error("{provider} backend unavailable: {message}")]
    BackendUnavailable { provider: String, message: String },

    #[error("protocol error from {provider}: {message}")]
    Protocol { provider: String, message: String },

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("composition error in {phase} phase: {source}")]
    Composition {
        phase: CallPhase,
        #[source]
        source: Box<DeepAgentError>,
        /// Tokens already spent before the failure.
        usage: Usage,
    },

    #[error("call cancelled during {phase} phase")]
    Cancelled { phase: CallPhase, usage: Usage },

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("invalid configuration: {0}")]
    ConfigError(String),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl DeepAgentError {
    pub(crate) fn unavailable(provider: &str, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn protocol(provider: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Phase a composite call failed in, if this error came from one.
    pub fn phase(&self) -> Option<CallPhase> {
        match self {
            Self::Composition { phase, .. } | Self::Cancelled { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Usage already spent when a composite call failed or was cancelled.
    pub fn usage(&self) -> Option<&Usage> {
        match self {
            Self::Composition { usage, .. } | Self::Cancelled { usage, .. } => Some(usage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DeepAgentError>;

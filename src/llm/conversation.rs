use crate::error::{DeepAgentError, Result};
use crate::llm::models::LlmMessage;
use serde::Serialize;
use std::collections::HashSet;

/// Ordered, append-only message history.
///
/// A tool-result segment is only accepted after the tool-call segment it
/// answers, matched by correlation id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Conversation {
    messages: Vec<LlmMessage>,
    #[serde(skip)]
    open_calls: HashSet<String>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a conversation, validating tool-result correlation.
    pub fn from_messages(messages: impl IntoIterator<Item = LlmMessage>) -> Result<Self> {
        let mut conversation = Self::new();
        for message in messages {
            conversation.push(message)?;
        }
        Ok(conversation)
    }

    pub fn push(&mut self, message: LlmMessage) -> Result<()> {
        match &message {
            LlmMessage::ToolCall { call, .. } => {
                self.open_calls.insert(call.id.clone());
            }
            LlmMessage::ToolReturn { tool_call_id, .. } => {
                if !self.open_calls.contains(tool_call_id) {
                    return Err(DeepAgentError::InvalidConversation(format!(
                        "tool result references unknown tool call '{}'",
                        tool_call_id
                    )));
                }
            }
            LlmMessage::System { .. } | LlmMessage::User { .. } | LlmMessage::Assistant { .. } => {}
        }
        self.messages.push(message);
        Ok(())
    }

    /// Copy of this conversation with `message` appended.
    pub fn extended(&self, message: LlmMessage) -> Result<Self> {
        let mut copy = self.clone();
        copy.push(message)?;
        Ok(copy)
    }

    pub fn messages(&self) -> &[LlmMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&LlmMessage> {
        self.messages.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LlmMessage> {
        self.messages.iter()
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a LlmMessage;
    type IntoIter = std::slice::Iter<'a, LlmMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

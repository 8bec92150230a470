use crate::api::ChatMessage;
use crate::core::message::{Message, Role, TranscriptEntry};

/// Ordered transcript of one chat tab.
///
/// Messages appended through the send flow alternate `user`, `assistant`
/// starting with `user`. System messages may sit between turns and do not
/// count toward the alternation. Notices are kept for display only and are
/// skipped when the prompt or a transcript is built. Imported transcripts
/// are loaded as-is, even when they do not alternate.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    fn last_conversational(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role.is_conversational())
    }

    /// True when the newest user/assistant turn is a user message with no reply yet.
    pub fn awaiting_reply(&self) -> bool {
        self.last_conversational().is_some_and(Message::is_user)
    }

    pub fn push_user(&mut self, content: impl Into<String>, timestamp: Option<String>) {
        self.messages
            .push(Message::user(content).with_timestamp(timestamp));
    }

    pub fn push_assistant(
        &mut self,
        content: impl Into<String>,
        model: impl Into<String>,
        timestamp: Option<String>,
    ) {
        self.messages
            .push(Message::assistant(content, model).with_timestamp(timestamp));
    }

    pub fn push_notice(&mut self, content: impl Into<String>, timestamp: Option<String>) {
        self.messages
            .push(Message::notice(content).with_timestamp(timestamp));
    }

    /// Removes every message at or after `index`.
    pub fn truncate(&mut self, index: usize) {
        self.messages.truncate(index);
    }

    /// Drops a trailing user message that never received a reply and returns it.
    pub fn pop_unanswered_user(&mut self) -> Option<Message> {
        if self.messages.last().is_some_and(Message::is_user) {
            self.messages.pop()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Snapshot of the conversation in provider form.
    pub fn to_api_messages(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter_map(Message::to_api_message)
            .collect()
    }

    /// Checks that user and assistant turns alternate from the first one,
    /// starting with `user`.
    pub fn is_alternating(&self) -> bool {
        self.messages
            .iter()
            .filter(|m| m.role.is_conversational())
            .enumerate()
            .all(|(i, m)| {
                let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
                m.role == expected
            })
    }

    pub fn to_transcript(&self) -> Vec<TranscriptEntry> {
        self.messages
            .iter()
            .filter(|m| !m.notice)
            .map(TranscriptEntry::from)
            .collect()
    }

    /// Model named by the newest assistant message, if any.
    pub fn last_assistant_model(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.is_assistant())
            .find_map(|m| m.model.as_deref())
    }
}

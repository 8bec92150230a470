use serde::{Deserialize, Serialize};

use crate::api::ChatMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Whether messages with this role take part in the user/assistant alternation.
    pub fn is_conversational(self) -> bool {
        matches!(self, Role::User | Role::Assistant)
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Local status line shown in the transcript (e.g. a truncation warning).
    /// Never sent to the provider and never exported.
    #[serde(skip)]
    pub notice: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            model: None,
            timestamp: None,
            notice: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content).with_model(model)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn notice(content: impl Into<String>) -> Self {
        Self {
            notice: true,
            ..Self::system(content)
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }

    pub fn to_api_message(&self) -> Option<ChatMessage> {
        (!self.notice).then(|| ChatMessage::new(self.role.as_str(), self.content.clone()))
    }
}

/// The portable `{role, content, model?}` shape used for import and export.
/// Timestamps are display-only and are not carried across.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl From<&Message> for TranscriptEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            model: message.model.clone(),
        }
    }
}

impl TryFrom<TranscriptEntry> for Message {
    type Error = String;

    fn try_from(entry: TranscriptEntry) -> Result<Self, Self::Error> {
        let role = Role::try_from(entry.role.as_str())?;
        Ok(Message {
            role,
            content: entry.content,
            model: entry.model,
            timestamp: None,
            notice: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_are_not_sent_to_the_provider() {
        assert!(Message::notice("truncated").to_api_message().is_none());
        let system = Message::system("You are terse.")
            .to_api_message()
            .expect("system prompt");
        assert_eq!(system.role, "system");
        let api = Message::user("hello").to_api_message().expect("user turn");
        assert_eq!(api.role, "user");
        assert_eq!(api.content, "hello");
    }

    #[test]
    fn invalid_role_strings_are_rejected() {
        assert!(Role::try_from("tool").is_err());
        let entry = TranscriptEntry {
            role: "app/info".into(),
            content: "x".into(),
            model: None,
        };
        assert!(Message::try_from(entry).is_err());
    }

    #[test]
    fn transcript_entry_keeps_model_and_drops_timestamp() {
        let message = Message::assistant("Hi", "gpt-4o").with_timestamp(Some("10:00:00".into()));
        let entry = TranscriptEntry::from(&message);
        let json = serde_json::to_string(&entry).expect("serialize");
        assert_eq!(
            json,
            r#"{"role":"assistant","content":"Hi","model":"gpt-4o"}"#
        );
    }
}

//! Message and Conversation domain types.
//!
//! A conversation is the internal, provider-neutral representation of a
//! dialogue: an ordered, append-only sequence of role-tagged messages.
//! The dispatch layer converts it into each adapter's wire vocabulary
//! (human → user, ai → assistant) without ever mutating the original.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions / framing for the model
    System,
    /// The requesting side (end user or orchestrator)
    Human,
    /// A model-generated reply
    Ai,
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new human message.
    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    /// Create a new AI message.
    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Role::Ai, content)
    }
}

/// An ordered sequence of messages.
///
/// Append-only from the caller's perspective; message order is preserved
/// exactly as pushed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered messages
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Builder-style append, useful when assembling prompts inline.
    pub fn with(mut self, message: Message) -> Self {
        self.push(message);
        self
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_human_message() {
        let msg = Message::human("Hello, agent!");
        assert_eq!(msg.role, Role::Human);
        assert_eq!(msg.content, "Hello, agent!");
    }

    #[test]
    fn conversation_preserves_order() {
        let conv = Conversation::new()
            .with(Message::system("be terse"))
            .with(Message::human("first"))
            .with(Message::ai("second"))
            .with(Message::human("third"));

        let roles: Vec<Role> = conv.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Human, Role::Ai, Role::Human]);
        assert_eq!(conv.messages[3].content, "third");
    }

    #[test]
    fn message_serialization_roundtrip() {
        let msg = Message::ai("Test reply");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ai\""));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test reply");
        assert_eq!(deserialized.role, Role::Ai);
    }
}

//! UI-agnostic conversation types
//!
//! This module contains data structures that are shared between the terminal
//! UI and the one-shot CLI and don't depend on any specific UI framework.

use serde::{Deserialize, Serialize};

/// A chat message in the AI conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// The role of a chat message sender
///
/// The system instruction is never part of a conversation; it only exists on
/// the wire, so it has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let parsed: Result<ChatMessage, _> =
            serde_json::from_str(r#"{"role":"system","content":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_extra_fields_are_rejected() {
        let parsed: Result<ChatMessage, _> =
            serde_json::from_str(r#"{"role":"user","content":"x","id":3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_non_string_content_is_rejected() {
        let parsed: Result<ChatMessage, _> =
            serde_json::from_str(r#"{"role":"assistant","content":42}"#);
        assert!(parsed.is_err());
    }
}

//! Conversation message types.
//!
//! Messages follow the content-block model of the Claude Messages API: a
//! message is either plain text or a list of typed blocks (`text`,
//! `tool_use`, `tool_result`). The system prompt is not a message; it
//! travels separately on the completion request.

use serde::{Deserialize, Serialize};

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (also carries tool results back to the model)
    User,
    /// The AI assistant
    Assistant,
}

/// A single typed fragment of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text
    Text { text: String },

    /// The model asks for a tool to be invoked
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    /// The outcome of a tool invocation, sent back to the model
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_use(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// The text of a `Text` block, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content: a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who sent this message
    pub role: Role,

    /// The content
    pub content: MessageContent,
}

impl ChatMessage {
    /// Create a new user text message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a new assistant text message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a message from a list of content blocks.
    pub fn blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Concatenate the text of this message (newline-joined for block content).
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(ContentBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_use_block_serializes_with_type_tag() {
        let block = ContentBlock::tool_use("toolu_1", "calendar_list", serde_json::json!({"day": "today"}));
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");
        assert_eq!(json["name"], "calendar_list");
        assert_eq!(json["input"]["day"], "today");
    }

    #[test]
    fn tool_result_omits_is_error_when_false() {
        let ok = serde_json::to_string(&ContentBlock::tool_result("t1", "{}", false)).unwrap();
        assert!(!ok.contains("is_error"));

        let failed = serde_json::to_value(ContentBlock::tool_result("t1", "{}", true)).unwrap();
        assert_eq!(failed["is_error"], true);
    }

    #[test]
    fn message_text_joins_text_blocks() {
        let msg = ChatMessage::blocks(
            Role::Assistant,
            vec![
                ContentBlock::text("first"),
                ContentBlock::tool_use("t1", "x", serde_json::json!({})),
                ContentBlock::text("second"),
            ],
        );
        assert_eq!(msg.text(), "first\nsecond");
    }

    #[test]
    fn plain_content_deserializes_as_text() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content, MessageContent::Text("hi".into()));
    }
}

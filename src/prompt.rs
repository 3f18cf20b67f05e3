//! Prompt data model and flattening.
//!
//! A [`Prompt`] is either plain text or an ordered list of [`Message`]s whose
//! content may be split into typed [`ContentPart`]s. Only text parts take part
//! in memory operations; every other part is carried along for the backend
//! and ignored here.
//!
//! # Example
//!
//! ```rust
//! use memloom::prompt::{ContentPart, Message, MessageRole, Prompt, flatten};
//!
//! let prompt = Prompt::Messages(vec![Message::parts(
//!     MessageRole::User,
//!     vec![ContentPart::text("I love red cars."), ContentPart::text("Any SUVs?")],
//! )]);
//! assert_eq!(flatten(&prompt), "I love red cars. Any SUVs?");
//! ```

use serde::{Deserialize, Serialize};

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
    /// Tool response.
    Tool,
}

/// A content part of a structured message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image content (URL or base64 data URL).
    #[serde(rename_all = "camelCase")]
    Image {
        image: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Arbitrary file attachment.
    #[serde(rename_all = "camelCase")]
    File { data: String, mime_type: String },
    /// Tool invocation issued by the assistant.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    /// Result of a tool invocation.
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    /// Any part type this crate does not model.
    #[serde(other)]
    Unsupported,
}

impl ContentPart {
    /// Create a text content part.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }

    /// Create an image content part.
    #[must_use]
    pub fn image(url: impl Into<String>) -> Self {
        Self::Image {
            image: url.into(),
            mime_type: None,
        }
    }

    /// The text of this part, if it is a text part.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message content - either a single string or ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Scalar text content.
    Text(String),
    /// Composite content.
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Iterate over the text fragments of this content, in order.
    pub fn text_parts(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            Self::Text(text) => Box::new(std::iter::once(text.as_str())),
            Self::Parts(parts) => Box::new(parts.iter().filter_map(ContentPart::as_text)),
        }
    }

    /// All text fragments joined by a single space.
    pub fn joined_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(_) => self.text_parts().collect::<Vec<_>>().join(" "),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A single conversational turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Content of the message.
    pub content: MessageContent,
}

impl Message {
    /// A message with scalar text content.
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(content.into()),
        }
    }

    /// A message with composite content.
    pub fn parts(role: MessageRole, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: MessageContent::Parts(parts),
        }
    }

    /// Shorthand for a user text message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(MessageRole::User, content)
    }

    /// Shorthand for an assistant text message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(MessageRole::Assistant, content)
    }
}

/// Inbound prompt: plain text or structured turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// The prompt as backend messages; plain text becomes one user turn.
    pub fn to_messages(&self) -> Vec<Message> {
        match self {
            Self::Text(text) => vec![Message::user(text.clone())],
            Self::Messages(messages) => messages.clone(),
        }
    }
}

impl From<&str> for Prompt {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Self::Messages(messages)
    }
}

/// Flatten a prompt to the query text used for memory search.
///
/// Only text authored by user turns survives, joined by a single space in
/// original order. Plain-text prompts pass through unchanged.
pub fn flatten(prompt: &Prompt) -> String {
    match prompt {
        Prompt::Text(text) => text.clone(),
        Prompt::Messages(messages) => messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .flat_map(|m| m.content.text_parts())
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Convert a prompt into memory-storage turns with scalar content.
///
/// Each turn keeps its role and has its text parts joined by a space. A turn
/// without any text part is kept with empty content.
pub fn convert(prompt: &Prompt) -> Vec<Message> {
    match prompt {
        Prompt::Text(text) => vec![Message::user(text.clone())],
        Prompt::Messages(messages) => messages
            .iter()
            .map(|m| Message::text(m.role, m.content.joined_text()))
            .collect(),
    }
}

/// Convert a prompt into one storage turn per text part.
///
/// Used by the explicit add path, where every text part is stored as its own
/// fact. Turns without text contribute nothing.
pub fn convert_per_part(prompt: &Prompt) -> Vec<Message> {
    match prompt {
        Prompt::Text(text) => vec![Message::user(text.clone())],
        Prompt::Messages(messages) => messages
            .iter()
            .flat_map(|m| m.content.text_parts().map(|t| Message::text(m.role, t)))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Prompt {
        Prompt::Messages(vec![
            Message::text(MessageRole::System, "Be brief."),
            Message::parts(
                MessageRole::User,
                vec![
                    ContentPart::text("I love red cars."),
                    ContentPart::image("https://example.com/car.png"),
                    ContentPart::text("I prefer SUVs."),
                ],
            ),
            Message::assistant("Noted."),
            Message::user("Which car should I buy?"),
        ])
    }

    #[test]
    fn test_flatten_keeps_only_user_text() {
        assert_eq!(
            flatten(&conversation()),
            "I love red cars. I prefer SUVs. Which car should I buy?"
        );
    }

    #[test]
    fn test_flatten_plain_text_passthrough() {
        assert_eq!(flatten(&Prompt::from("  raw text ")), "  raw text ");
    }

    #[test]
    fn test_flatten_non_text_only_is_empty() {
        let prompt = Prompt::Messages(vec![Message::parts(
            MessageRole::User,
            vec![
                ContentPart::image("a.png"),
                ContentPart::File {
                    data: "Zm9v".into(),
                    mime_type: "text/plain".into(),
                },
            ],
        )]);
        assert_eq!(flatten(&prompt), "");
    }

    #[test]
    fn test_convert_preserves_roles_and_empty_turns() {
        let mut messages = match conversation() {
            Prompt::Messages(m) => m,
            Prompt::Text(_) => unreachable!(),
        };
        messages.push(Message::parts(
            MessageRole::Assistant,
            vec![ContentPart::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "lookup".into(),
                args: serde_json::json!({}),
            }],
        ));

        let converted = convert(&Prompt::Messages(messages));
        assert_eq!(converted.len(), 5);
        assert_eq!(converted[0], Message::text(MessageRole::System, "Be brief."));
        assert_eq!(converted[1], Message::user("I love red cars. I prefer SUVs."));
        assert_eq!(converted[4], Message::assistant(""));
    }

    #[test]
    fn test_convert_per_part_splits_text() {
        let converted = convert_per_part(&conversation());
        let contents: Vec<_> = converted.iter().map(|m| m.content.joined_text()).collect();
        assert_eq!(
            contents,
            vec![
                "Be brief.",
                "I love red cars.",
                "I prefer SUVs.",
                "Noted.",
                "Which car should I buy?"
            ]
        );
    }

    #[test]
    fn test_prompt_deserializes_both_shapes() {
        let text: Prompt = serde_json::from_str(r#""hello""#).unwrap();
        assert_eq!(text, Prompt::from("hello"));

        let structured: Prompt = serde_json::from_value(serde_json::json!([
            {"role": "user", "content": [
                {"type": "text", "text": "hi"},
                {"type": "reasoning", "text": "hidden"}
            ]}
        ]))
        .unwrap();
        let Prompt::Messages(messages) = structured else {
            panic!("expected structured prompt");
        };
        let MessageContent::Parts(parts) = &messages[0].content else {
            panic!("expected parts");
        };
        assert_eq!(parts[1], ContentPart::Unsupported);
        assert_eq!(messages[0].content.joined_text(), "hi");
    }

    #[test]
    fn test_scalar_message_wire_shape() {
        let json = serde_json::to_value(Message::user("hello")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hello"}));
    }
}

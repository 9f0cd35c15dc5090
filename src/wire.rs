//! Typed models for the two chat-completion wire formats.
//!
//! The structs here are deliberately permissive on the way in (defaults for
//! missing fields, untagged fallbacks for unknown shapes) so a request or
//! response that does not need translation is never rejected for being
//! unusual. Translation itself is projective: the mapper copies the fields
//! the other schema can express and leaves the rest behind.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two JSON schemas the proxy can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFormat {
    /// Conversational turns with typed content blocks (`/v1/messages`).
    Anthropic,
    /// Flat messages with tool-call arrays (`/v1/chat/completions`).
    OpenAi,
}

impl ApiFormat {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Some(ApiFormat::Anthropic),
            "openai" => Some(ApiFormat::OpenAi),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiFormat::Anthropic => "anthropic",
            ApiFormat::OpenAi => "openai",
        }
    }
}

impl fmt::Display for ApiFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Blocks format (Anthropic-style)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<AnthropicMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    /// Either a plain string or an array of text blocks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<AnthropicToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicMessage {
    pub role: String,
    #[serde(default)]
    pub content: AnthropicContent,
}

/// Message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for AnthropicContent {
    fn default() -> Self {
        AnthropicContent::Text(String::new())
    }
}

impl AnthropicContent {
    /// All text carried by the content, block texts concatenated in order.
    pub fn joined_text(&self) -> String {
        match self {
            AnthropicContent::Text(s) => s.clone(),
            AnthropicContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Known(KnownBlock::Text { text }) => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            AnthropicContent::Text(_) => &[],
            AnthropicContent::Blocks(blocks) => blocks,
        }
    }
}

/// A typed content block, with a raw-JSON fallback so block kinds this proxy
/// does not know about still round-trip through a parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentBlock {
    Known(KnownBlock),
    Other(Value),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnownBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        /// A string or a nested block array.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Known(KnownBlock::Text { text: text.into() })
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentBlock::Known(KnownBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        })
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        ContentBlock::Known(KnownBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: Some(Value::String(content.into())),
            is_error: None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Tool-choice directive. Kept as a loose struct so an unknown `type` parses
/// and can be skipped, rather than failing the whole request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicToolChoice {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicResponse {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "message_kind")]
    pub kind: String,
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

fn message_kind() -> String {
    "message".to_string()
}

fn assistant_role() -> String {
    "assistant".to_string()
}

// ---------------------------------------------------------------------------
// Flat format (OpenAI-style)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<OpenAiStop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<OpenAiToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiStop {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default)]
    pub content: OpenAiContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl OpenAiMessage {
    pub fn text(role: impl Into<String>, content: impl Into<String>) -> Self {
        OpenAiMessage {
            role: role.into(),
            content: OpenAiContent::Text(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn declared_tool_calls(&self) -> &[OpenAiToolCall] {
        self.tool_calls.as_deref().unwrap_or(&[])
    }
}

/// Flat-format content: a string, an array of typed parts, or JSON null
/// (assistant messages that only carry tool calls).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<Value>),
    Null,
}

impl Default for OpenAiContent {
    fn default() -> Self {
        OpenAiContent::Null
    }
}

impl OpenAiContent {
    /// Text carried by the content, part texts concatenated in order.
    pub fn joined_text(&self) -> String {
        match self {
            OpenAiContent::Text(s) => s.clone(),
            OpenAiContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect(),
            OpenAiContent::Null => String::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OpenAiContent::Text(s) => s.is_empty(),
            OpenAiContent::Parts(parts) => parts.is_empty(),
            OpenAiContent::Null => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    #[serde(default)]
    pub name: String,
    /// JSON-encoded argument object, as the flat format requires.
    #[serde(default)]
    pub arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: OpenAiFunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// `tool_choice` is either a bare mode string or a named-function object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiToolChoice {
    Mode(String),
    Named(OpenAiNamedToolChoice),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiNamedToolChoice {
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: OpenAiFunctionName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "chat_completion_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: OpenAiUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    pub index: u32,
    pub message: OpenAiResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiResponseMessage {
    #[serde(default = "assistant_role")]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

fn chat_completion_object() -> String {
    "chat.completion".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_deserializes_string_and_blocks() {
        let text: AnthropicContent = serde_json::from_value(json!("hello")).unwrap();
        assert_eq!(text.joined_text(), "hello");

        let blocks: AnthropicContent = serde_json::from_value(json!([
            {"type": "text", "text": "a"},
            {"type": "tool_use", "id": "t1", "name": "calc", "input": {"x": 1}},
            {"type": "text", "text": "b"},
        ]))
        .unwrap();
        assert_eq!(blocks.joined_text(), "ab");
        assert_eq!(blocks.blocks().len(), 3);
    }

    #[test]
    fn unknown_block_kind_survives_a_round_trip() {
        let raw = json!({"type": "document", "source": {"data": "zzz"}});
        let block: ContentBlock = serde_json::from_value(raw.clone()).unwrap();
        assert!(matches!(block, ContentBlock::Other(_)));
        assert_eq!(serde_json::to_value(&block).unwrap(), raw);
    }

    #[test]
    fn tool_result_content_accepts_nested_blocks() {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_result",
            "tool_use_id": "t1",
            "content": [{"type": "text", "text": "42"}],
        }))
        .unwrap();
        let ContentBlock::Known(KnownBlock::ToolResult { tool_use_id, content, .. }) = block
        else {
            panic!("expected tool_result");
        };
        assert_eq!(tool_use_id, "t1");
        assert!(content.unwrap().is_array());
    }

    #[test]
    fn flat_content_accepts_null_and_parts() {
        let msg: OpenAiMessage = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
        }))
        .unwrap();
        assert!(msg.content.is_empty());

        let msg: OpenAiMessage = serde_json::from_value(json!({
            "role": "user",
            "content": [{"type": "text", "text": "hi "}, {"type": "text", "text": "there"}],
        }))
        .unwrap();
        assert_eq!(msg.content.joined_text(), "hi there");
    }

    #[test]
    fn assistant_null_content_serializes_as_null() {
        let msg = OpenAiMessage {
            role: "assistant".to_string(),
            content: OpenAiContent::Null,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v.get("content"), Some(&Value::Null));
        assert!(v.get("tool_calls").is_none());
    }

    #[test]
    fn tool_call_defaults_fill_missing_fields() {
        let call: OpenAiToolCall = serde_json::from_value(json!({
            "function": {"name": "lookup"},
        }))
        .unwrap();
        assert_eq!(call.id, "");
        assert_eq!(call.kind, "function");
        assert_eq!(call.function.arguments, "");
    }

    #[test]
    fn format_names_parse_case_insensitively() {
        assert_eq!(ApiFormat::from_name("Anthropic"), Some(ApiFormat::Anthropic));
        assert_eq!(ApiFormat::from_name(" openai "), Some(ApiFormat::OpenAi));
        assert_eq!(ApiFormat::from_name("gemini"), None);
    }

    #[test]
    fn stop_accepts_string_or_array() {
        let req: OpenAiRequest =
            serde_json::from_value(json!({"messages": [], "stop": "END"})).unwrap();
        assert!(matches!(req.stop, Some(OpenAiStop::One(_))));

        let req: OpenAiRequest =
            serde_json::from_value(json!({"messages": [], "stop": ["a", "b"]})).unwrap();
        assert!(matches!(req.stop, Some(OpenAiStop::Many(ref v)) if v.len() == 2));
    }
}

//! Request body translation between the two wire formats.
//!
//! Translation is total: a body that fails to parse as the expected source
//! schema is relayed unmapped rather than rejected, on the theory that the
//! upstream is the better judge of what it accepts.

use serde_json::{Value, json};
use tracing::warn;

use crate::constants::{ANTHROPIC_MESSAGES_PATH, DEFAULT_MAX_TOKENS, OPENAI_CHAT_PATH};
use crate::detect::FormatContext;
use crate::transforms::reconcile;
use crate::wire::{
    AnthropicContent, AnthropicMessage, AnthropicRequest, AnthropicTool, AnthropicToolChoice,
    ApiFormat, ContentBlock, KnownBlock, OpenAiContent, OpenAiFunctionCall, OpenAiFunctionDef,
    OpenAiFunctionName, OpenAiMessage, OpenAiNamedToolChoice, OpenAiRequest, OpenAiStop,
    OpenAiTool, OpenAiToolCall, OpenAiToolChoice,
};

/// Translates a request body into the upstream's schema. Identity when the
/// client already speaks it.
pub fn map_request(body: Value, ctx: &FormatContext) -> Value {
    if !ctx.needs_mapping {
        return body;
    }
    match (ctx.client, ctx.target) {
        (ApiFormat::Anthropic, ApiFormat::OpenAi) => anthropic_to_openai(body),
        (ApiFormat::OpenAi, ApiFormat::Anthropic) => openai_to_anthropic(body),
        _ => body,
    }
}

/// Rewrites the request path to the endpoint the upstream schema expects.
pub fn target_endpoint<'a>(original_path: &'a str, ctx: &FormatContext) -> &'a str {
    if !ctx.needs_mapping {
        return original_path;
    }
    match ctx.target {
        ApiFormat::Anthropic => ANTHROPIC_MESSAGES_PATH,
        ApiFormat::OpenAi => OPENAI_CHAT_PATH,
    }
}

fn anthropic_to_openai(body: Value) -> Value {
    let req: AnthropicRequest = match serde_json::from_value(body.clone()) {
        Ok(req) => req,
        Err(e) => {
            warn!("body does not parse as the blocks format, relaying unmapped: {e}");
            return body;
        }
    };

    let mut messages: Vec<OpenAiMessage> = Vec::new();

    if let Some(system) = req.system.as_ref().and_then(system_text) {
        messages.push(OpenAiMessage::text("system", system));
    }

    for message in &req.messages {
        match message.role.as_str() {
            "user" => {
                let mut tool_messages: Vec<OpenAiMessage> = Vec::new();
                for block in message.content.blocks() {
                    if let ContentBlock::Known(KnownBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    }) = block
                    {
                        tool_messages.push(OpenAiMessage {
                            role: "tool".to_string(),
                            content: tool_result_to_flat_content(content.as_ref()),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                            name: None,
                        });
                    }
                }
                let text = message.content.joined_text();
                let had_results = !tool_messages.is_empty();
                // Tool responses come first so they stay adjacent to the
                // assistant message that called for them.
                messages.append(&mut tool_messages);
                if !text.is_empty() || !had_results {
                    messages.push(OpenAiMessage::text("user", text));
                }
            }
            "assistant" => {
                let text = message.content.joined_text();
                let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
                for block in message.content.blocks() {
                    if let ContentBlock::Known(KnownBlock::ToolUse { id, name, input }) = block {
                        tool_calls.push(OpenAiToolCall {
                            id: id.clone(),
                            kind: "function".to_string(),
                            function: OpenAiFunctionCall {
                                name: name.clone(),
                                arguments: encode_arguments(input),
                            },
                        });
                    }
                }
                messages.push(OpenAiMessage {
                    role: "assistant".to_string(),
                    content: if text.is_empty() {
                        OpenAiContent::Null
                    } else {
                        OpenAiContent::Text(text)
                    },
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    tool_call_id: None,
                    name: None,
                });
            }
            // The blocks format only defines user and assistant roles.
            _ => {}
        }
    }

    let messages = reconcile::repair_openai(&messages);

    let out = OpenAiRequest {
        model: req.model,
        messages,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stop: req.stop_sequences.map(OpenAiStop::Many),
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| OpenAiTool {
                    kind: "function".to_string(),
                    function: OpenAiFunctionDef {
                        name: tool.name,
                        description: tool.description,
                        parameters: tool.input_schema,
                    },
                })
                .collect()
        }),
        tool_choice: req.tool_choice.and_then(tool_choice_to_flat),
    };
    serde_json::to_value(&out).unwrap_or(body)
}

fn openai_to_anthropic(body: Value) -> Value {
    let req: OpenAiRequest = match serde_json::from_value(body.clone()) {
        Ok(req) => req,
        Err(e) => {
            warn!("body does not parse as the flat format, relaying unmapped: {e}");
            return body;
        }
    };

    let mut system_parts: Vec<String> = Vec::new();
    let mut turns: Vec<AnthropicMessage> = Vec::new();
    let messages = &req.messages;
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        match message.role.as_str() {
            "system" => {
                let text = message.content.joined_text();
                if !text.is_empty() {
                    system_parts.push(text);
                }
                i += 1;
            }
            "user" => {
                let mut content: Vec<ContentBlock> = Vec::new();
                let text = message.content.joined_text();
                if !text.is_empty() {
                    content.push(ContentBlock::text(text));
                }
                // Tool responses placed after a user message belong to that
                // turn as tool_result blocks.
                let run_end = tool_run_end(messages, i + 1);
                for tool in &messages[i + 1..run_end] {
                    content.push(flat_tool_to_result_block(tool));
                }
                turns.push(collapse_turn("user", content));
                i = run_end;
            }
            "assistant" => {
                let text = message.content.joined_text();
                let mut content: Vec<ContentBlock> = Vec::new();
                if !text.is_empty() {
                    content.push(ContentBlock::text(text));
                }
                for call in message.declared_tool_calls() {
                    content.push(ContentBlock::tool_use(
                        call.id.clone(),
                        call.function.name.clone(),
                        decode_arguments(&call.function.arguments),
                    ));
                }
                turns.push(collapse_turn("assistant", content));
                i += 1;

                // Tool responses directly after the call-declaring message
                // become the following user turn, merged with the client's
                // own next user message when there is one.
                let run_end = tool_run_end(messages, i);
                let mut results: Vec<ContentBlock> = messages[i..run_end]
                    .iter()
                    .map(flat_tool_to_result_block)
                    .collect();
                i = run_end;
                if !results.is_empty() {
                    if i < messages.len() && messages[i].role == "user" {
                        let text = messages[i].content.joined_text();
                        if !text.is_empty() {
                            results.push(ContentBlock::text(text));
                        }
                        let trailing = tool_run_end(messages, i + 1);
                        for tool in &messages[i + 1..trailing] {
                            results.push(flat_tool_to_result_block(tool));
                        }
                        i = trailing;
                    }
                    turns.push(collapse_turn("user", results));
                }
            }
            "tool" => {
                // A run with no adjacent anchor still becomes a user turn;
                // the upstream owns the verdict on its orphaned ids.
                let run_end = tool_run_end(messages, i);
                let content: Vec<ContentBlock> = messages[i..run_end]
                    .iter()
                    .map(flat_tool_to_result_block)
                    .collect();
                turns.push(collapse_turn("user", content));
                i = run_end;
            }
            // Unknown roles have no counterpart turn.
            _ => {
                i += 1;
            }
        }
    }

    let turns = reconcile::repair_anthropic(&turns);

    let out = AnthropicRequest {
        model: req.model,
        messages: turns,
        max_tokens: Some(req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)),
        system: if system_parts.is_empty() {
            None
        } else {
            Some(Value::String(system_parts.join("\n\n")))
        },
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stop_sequences: req.stop.map(|stop| match stop {
            OpenAiStop::One(s) => vec![s],
            OpenAiStop::Many(v) => v,
        }),
        tools: req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| AnthropicTool {
                    name: tool.function.name,
                    description: tool.function.description,
                    input_schema: tool.function.parameters,
                })
                .collect()
        }),
        tool_choice: req.tool_choice.and_then(tool_choice_to_blocks),
    };
    serde_json::to_value(&out).unwrap_or(body)
}

fn tool_run_end(messages: &[OpenAiMessage], start: usize) -> usize {
    let mut end = start;
    while end < messages.len() && messages[end].role == "tool" {
        end += 1;
    }
    end
}

/// Single text block collapses to a bare string, everything else stays a
/// block array (including the empty one).
fn collapse_turn(role: &str, content: Vec<ContentBlock>) -> AnthropicMessage {
    let content = match content.as_slice() {
        [ContentBlock::Known(KnownBlock::Text { text })] => AnthropicContent::Text(text.clone()),
        _ => AnthropicContent::Blocks(content),
    };
    AnthropicMessage {
        role: role.to_string(),
        content,
    }
}

/// Top-level `system` is a string or an array of text blocks; both flatten
/// to one string.
fn system_text(system: &Value) -> Option<String> {
    match system {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n\n"))
            }
        }
        _ => None,
    }
}

/// tool_result content: strings pass through, block arrays ride along raw,
/// anything absent becomes the empty string.
fn tool_result_to_flat_content(content: Option<&Value>) -> OpenAiContent {
    match content {
        Some(Value::String(s)) => OpenAiContent::Text(s.clone()),
        Some(Value::Array(parts)) => OpenAiContent::Parts(parts.clone()),
        _ => OpenAiContent::Text(String::new()),
    }
}

fn flat_tool_to_result_block(tool: &OpenAiMessage) -> ContentBlock {
    let content = match &tool.content {
        OpenAiContent::Text(s) => Value::String(s.clone()),
        OpenAiContent::Parts(parts) => Value::Array(parts.clone()),
        OpenAiContent::Null => Value::String(String::new()),
    };
    ContentBlock::Known(KnownBlock::ToolResult {
        tool_use_id: tool.tool_call_id.clone().unwrap_or_default(),
        content: Some(content),
        is_error: None,
    })
}

/// tool_use input is a JSON value; the flat format wants it as an encoded
/// string.
fn encode_arguments(input: &Value) -> String {
    if input.is_null() {
        return "{}".to_string();
    }
    serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
}

/// The reverse: an arguments string that fails to parse maps to the empty
/// object rather than failing the request.
fn decode_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return json!({});
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| json!({}))
}

fn tool_choice_to_flat(choice: AnthropicToolChoice) -> Option<OpenAiToolChoice> {
    match choice.kind.as_str() {
        "auto" => Some(OpenAiToolChoice::Mode("auto".to_string())),
        "any" => Some(OpenAiToolChoice::Mode("required".to_string())),
        "tool" => choice.name.map(|name| {
            OpenAiToolChoice::Named(OpenAiNamedToolChoice {
                kind: "function".to_string(),
                function: OpenAiFunctionName { name },
            })
        }),
        _ => None,
    }
}

fn tool_choice_to_blocks(choice: OpenAiToolChoice) -> Option<AnthropicToolChoice> {
    match choice {
        OpenAiToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(AnthropicToolChoice {
                kind: "auto".to_string(),
                name: None,
            }),
            "required" => Some(AnthropicToolChoice {
                kind: "any".to_string(),
                name: None,
            }),
            // "none" and unrecognized modes have no counterpart.
            _ => None,
        },
        OpenAiToolChoice::Named(named) => Some(AnthropicToolChoice {
            kind: "tool".to_string(),
            name: Some(named.function.name),
        }),
    }
}

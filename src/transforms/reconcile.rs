//! Repair of malformed tool-call/tool-result pairings.
//!
//! Agent frameworks that truncate or reorder conversation history routinely
//! produce transcripts where a tool call has no recorded result, or a result
//! answers a call that is no longer present. Both upstream APIs reject such
//! transcripts outright. The proxy repairs instead: missing results get a
//! placeholder, orphaned results get a manufactured invocation, and valid
//! pairings pass through byte-for-byte.

use rand::Rng;

use crate::constants::{CONTINUATION_TEXT, MANUFACTURED_TOOL_NAME, PLACEHOLDER_TOOL_RESULT};
use crate::wire::{
    AnthropicContent, AnthropicMessage, ContentBlock, KnownBlock, OpenAiContent,
    OpenAiFunctionCall, OpenAiMessage, OpenAiToolCall,
};

/// Manufactured call id in the upstream `call_` style.
fn manufacture_call_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 12] = rng.random();
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("call_{hex}")
}

/// Restores the flat-format pairing rule: every assistant message that
/// declares tool calls is immediately followed by exactly one `tool` message
/// per declared id, in declaration order, and every `tool` message answers a
/// declared call.
pub fn repair_openai(messages: &[OpenAiMessage]) -> Vec<OpenAiMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut i = 0;
    while i < messages.len() {
        let message = &messages[i];
        if message.role == "assistant" && !message.declared_tool_calls().is_empty() {
            out.push(message.clone());
            let run_end = tool_run_end(messages, i + 1);
            let run = &messages[i + 1..run_end];
            let mut used = vec![false; run.len()];

            // One response per declared call, in declaration order.
            for call in message.declared_tool_calls() {
                let found = run
                    .iter()
                    .enumerate()
                    .find(|(k, tool)| {
                        !used[*k] && tool.tool_call_id.as_deref() == Some(call.id.as_str())
                    })
                    .map(|(k, _)| k);
                match found {
                    Some(k) => {
                        used[k] = true;
                        out.push(run[k].clone());
                    }
                    None => out.push(placeholder_response(&call.id)),
                }
            }

            // Responses answering no declared call each get their own
            // manufactured invocation spliced in front.
            for (k, tool) in run.iter().enumerate() {
                if !used[k] {
                    let (tool, id) = ensure_call_id(tool.clone());
                    out.push(manufactured_invocation(&id, tool.name.as_deref()));
                    out.push(tool);
                }
            }
            i = run_end;
        } else if message.role == "tool" {
            // A result with no call at all: manufacture the invocation.
            let (tool, id) = ensure_call_id(message.clone());
            out.push(manufactured_invocation(&id, tool.name.as_deref()));
            out.push(tool);
            i += 1;
        } else {
            out.push(message.clone());
            i += 1;
        }
    }
    out
}

/// Restores the blocks-format pairing rule: an assistant turn carrying
/// tool_use blocks is followed by a user turn answering every declared id.
/// Results the client never sent become placeholder tool_result blocks;
/// a missing user turn is synthesized outright. Orphaned tool_result blocks
/// are left untouched.
pub fn repair_anthropic(turns: &[AnthropicMessage]) -> Vec<AnthropicMessage> {
    let mut out = Vec::with_capacity(turns.len());
    let mut i = 0;
    while i < turns.len() {
        let turn = &turns[i];
        let declared = tool_use_ids(turn);
        if turn.role == "assistant" && !declared.is_empty() {
            out.push(turn.clone());
            if let Some(next) = turns.get(i + 1)
                && next.role == "user"
            {
                let have = tool_result_ids(next);
                let missing: Vec<&String> =
                    declared.iter().filter(|id| !have.contains(*id)).collect();
                if missing.is_empty() {
                    out.push(next.clone());
                } else {
                    let mut blocks = content_as_blocks(&next.content);
                    for id in missing {
                        blocks.push(placeholder_result(id));
                    }
                    out.push(AnthropicMessage {
                        role: "user".to_string(),
                        content: AnthropicContent::Blocks(blocks),
                    });
                }
                i += 2;
            } else {
                let mut blocks = vec![ContentBlock::text(CONTINUATION_TEXT)];
                for id in &declared {
                    blocks.push(placeholder_result(id));
                }
                out.push(AnthropicMessage {
                    role: "user".to_string(),
                    content: AnthropicContent::Blocks(blocks),
                });
                i += 1;
            }
        } else {
            out.push(turn.clone());
            i += 1;
        }
    }
    out
}

fn tool_run_end(messages: &[OpenAiMessage], start: usize) -> usize {
    let mut end = start;
    while end < messages.len() && messages[end].role == "tool" {
        end += 1;
    }
    end
}

fn placeholder_response(call_id: &str) -> OpenAiMessage {
    OpenAiMessage {
        role: "tool".to_string(),
        content: OpenAiContent::Text(PLACEHOLDER_TOOL_RESULT.to_string()),
        tool_calls: None,
        tool_call_id: Some(call_id.to_string()),
        name: None,
    }
}

fn manufactured_invocation(call_id: &str, name: Option<&str>) -> OpenAiMessage {
    OpenAiMessage {
        role: "assistant".to_string(),
        content: OpenAiContent::Null,
        tool_calls: Some(vec![OpenAiToolCall {
            id: call_id.to_string(),
            kind: "function".to_string(),
            function: OpenAiFunctionCall {
                name: name.unwrap_or(MANUFACTURED_TOOL_NAME).to_string(),
                arguments: "{}".to_string(),
            },
        }]),
        tool_call_id: None,
        name: None,
    }
}

fn ensure_call_id(mut tool: OpenAiMessage) -> (OpenAiMessage, String) {
    let id = match tool.tool_call_id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            let id = manufacture_call_id();
            tool.tool_call_id = Some(id.clone());
            id
        }
    };
    (tool, id)
}

fn placeholder_result(tool_use_id: &str) -> ContentBlock {
    ContentBlock::tool_result(tool_use_id, PLACEHOLDER_TOOL_RESULT)
}

fn tool_use_ids(turn: &AnthropicMessage) -> Vec<String> {
    turn.content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Known(KnownBlock::ToolUse { id, .. }) => Some(id.clone()),
            _ => None,
        })
        .collect()
}

fn tool_result_ids(turn: &AnthropicMessage) -> Vec<String> {
    turn.content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Known(KnownBlock::ToolResult { tool_use_id, .. }) => {
                Some(tool_use_id.clone())
            }
            _ => None,
        })
        .collect()
}

fn content_as_blocks(content: &AnthropicContent) -> Vec<ContentBlock> {
    match content {
        AnthropicContent::Text(text) if text.is_empty() => Vec::new(),
        AnthropicContent::Text(text) => vec![ContentBlock::text(text.clone())],
        AnthropicContent::Blocks(blocks) => blocks.clone(),
    }
}

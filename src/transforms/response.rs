//! Buffered response body translation.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};
use tracing::warn;

use crate::detect::FormatContext;
use crate::wire::{
    AnthropicResponse, AnthropicUsage, ApiFormat, ContentBlock, KnownBlock, OpenAiChoice,
    OpenAiFunctionCall, OpenAiResponse, OpenAiResponseMessage, OpenAiToolCall, OpenAiUsage,
};

/// Translates an upstream response body back into the client's schema.
/// Identity when no translation was applied on the way in. Finish reasons
/// cross untranslated: clients doing cross-format work already expect the
/// other side's vocabulary, and inventing a mapping would lose information.
pub fn map_response(body: Value, ctx: &FormatContext) -> Value {
    if !ctx.needs_mapping {
        return body;
    }
    match (ctx.target, ctx.client) {
        (ApiFormat::Anthropic, ApiFormat::OpenAi) => anthropic_response_to_openai(body),
        (ApiFormat::OpenAi, ApiFormat::Anthropic) => openai_response_to_anthropic(body),
        _ => body,
    }
}

fn anthropic_response_to_openai(body: Value) -> Value {
    let resp: AnthropicResponse = match serde_json::from_value(body.clone()) {
        Ok(resp) => resp,
        Err(e) => {
            warn!("response does not parse as the blocks format, relaying unmapped: {e}");
            return body;
        }
    };

    let mut text = String::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();
    for block in &resp.content {
        match block {
            ContentBlock::Known(KnownBlock::Text { text: t }) => text.push_str(t),
            ContentBlock::Known(KnownBlock::ToolUse { id, name, input }) => {
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    kind: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: name.clone(),
                        arguments: if input.is_null() {
                            "{}".to_string()
                        } else {
                            serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                        },
                    },
                });
            }
            _ => {}
        }
    }

    let out = OpenAiResponse {
        id: resp.id,
        object: "chat.completion".to_string(),
        created: now_secs(),
        model: resp.model,
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiResponseMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: resp.stop_reason,
        }],
        usage: OpenAiUsage {
            prompt_tokens: resp.usage.input_tokens,
            completion_tokens: resp.usage.output_tokens,
            total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
        },
    };
    serde_json::to_value(&out).unwrap_or(body)
}

fn openai_response_to_anthropic(body: Value) -> Value {
    let resp: OpenAiResponse = match serde_json::from_value(body.clone()) {
        Ok(resp) => resp,
        Err(e) => {
            warn!("response does not parse as the flat format, relaying unmapped: {e}");
            return body;
        }
    };

    let choice = resp.choices.into_iter().next().unwrap_or(OpenAiChoice {
        index: 0,
        message: OpenAiResponseMessage {
            role: "assistant".to_string(),
            content: None,
            tool_calls: None,
        },
        finish_reason: None,
    });

    let mut content: Vec<ContentBlock> = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ContentBlock::text(text));
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        let input = if call.function.arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(&call.function.arguments).unwrap_or_else(|_| json!({}))
        };
        content.push(ContentBlock::tool_use(call.id, call.function.name, input));
    }

    let out = AnthropicResponse {
        id: resp.id,
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp.model,
        stop_reason: choice.finish_reason,
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: resp.usage.prompt_tokens,
            output_tokens: resp.usage.completion_tokens,
        },
    };
    serde_json::to_value(&out).unwrap_or(body)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(client: ApiFormat, target: ApiFormat) -> FormatContext {
        FormatContext::new(client, Some(target))
    }

    #[test]
    fn identity_when_formats_match() {
        let body = json!({"id": "x", "choices": []});
        let ctx = FormatContext::new(ApiFormat::OpenAi, None);
        assert_eq!(map_response(body.clone(), &ctx), body);
    }

    #[test]
    fn blocks_response_converts_to_flat_shape() {
        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hello"}],
            "model": "m",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 2},
        });
        let ctx = mapping(ApiFormat::OpenAi, ApiFormat::Anthropic);
        let mapped = map_response(body, &ctx);

        assert_eq!(mapped["id"], "msg_1");
        assert_eq!(mapped["object"], "chat.completion");
        assert_eq!(mapped["model"], "m");
        let choice = &mapped["choices"][0];
        assert_eq!(choice["index"], 0);
        assert_eq!(choice["message"]["role"], "assistant");
        assert_eq!(choice["message"]["content"], "hello");
        // The stop reason crosses verbatim.
        assert_eq!(choice["finish_reason"], "end_turn");
        assert_eq!(mapped["usage"]["prompt_tokens"], 3);
        assert_eq!(mapped["usage"]["completion_tokens"], 2);
        assert_eq!(mapped["usage"]["total_tokens"], 5);
    }

    #[test]
    fn multiple_text_blocks_concatenate() {
        let body = json!({
            "id": "msg_2",
            "content": [
                {"type": "text", "text": "one "},
                {"type": "tool_use", "id": "tu", "name": "f", "input": {"a": 1}},
                {"type": "text", "text": "two"},
            ],
            "model": "m",
            "usage": {"input_tokens": 0, "output_tokens": 0},
        });
        let ctx = mapping(ApiFormat::OpenAi, ApiFormat::Anthropic);
        let mapped = map_response(body, &ctx);
        let message = &mapped["choices"][0]["message"];
        assert_eq!(message["content"], "one two");
        assert_eq!(message["tool_calls"][0]["id"], "tu");
        assert_eq!(message["tool_calls"][0]["function"]["arguments"], "{\"a\":1}");
    }

    #[test]
    fn tool_only_response_has_null_content() {
        let body = json!({
            "id": "msg_3",
            "content": [{"type": "tool_use", "id": "tu", "name": "f", "input": {}}],
            "model": "m",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });
        let ctx = mapping(ApiFormat::OpenAi, ApiFormat::Anthropic);
        let mapped = map_response(body, &ctx);
        let message = &mapped["choices"][0]["message"];
        assert_eq!(message["content"], Value::Null);
        assert_eq!(mapped["choices"][0]["finish_reason"], "tool_use");
    }

    #[test]
    fn flat_response_converts_to_blocks_shape() {
        let body = json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 123,
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi", "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "f", "arguments": "{\"x\":2}"}},
                ]},
                "finish_reason": "tool_calls",
            }],
            "usage": {"prompt_tokens": 7, "completion_tokens": 4, "total_tokens": 11},
        });
        let ctx = mapping(ApiFormat::Anthropic, ApiFormat::OpenAi);
        let mapped = map_response(body, &ctx);

        assert_eq!(mapped["id"], "chatcmpl-1");
        assert_eq!(mapped["type"], "message");
        assert_eq!(mapped["role"], "assistant");
        assert_eq!(mapped["content"][0], json!({"type": "text", "text": "hi"}));
        assert_eq!(mapped["content"][1]["type"], "tool_use");
        assert_eq!(mapped["content"][1]["input"], json!({"x": 2}));
        assert_eq!(mapped["stop_reason"], "tool_calls");
        assert_eq!(mapped["stop_sequence"], Value::Null);
        assert_eq!(mapped["usage"]["input_tokens"], 7);
        assert_eq!(mapped["usage"]["output_tokens"], 4);
    }

    #[test]
    fn empty_choice_list_degrades_to_empty_content() {
        let body = json!({"id": "chatcmpl-2", "model": "m", "choices": [], "usage": {}});
        let ctx = mapping(ApiFormat::Anthropic, ApiFormat::OpenAi);
        let mapped = map_response(body, &ctx);
        assert_eq!(mapped["content"], json!([]));
        assert_eq!(mapped["stop_reason"], Value::Null);
    }

    #[test]
    fn unparseable_response_is_relayed_unmapped() {
        let body = json!("just a string");
        let ctx = mapping(ApiFormat::Anthropic, ApiFormat::OpenAi);
        assert_eq!(map_response(body.clone(), &ctx), body);
    }
}

//! Per-line SSE event translation.
//!
//! A chunk is split on newlines and each `data:` line is converted on its
//! own. Anything that is not a recognizable event (comments, `event:` lines,
//! the `[DONE]` sentinel, payloads that fail to decode, event kinds this
//! proxy has never heard of) passes through byte-for-byte, so upstream
//! additions degrade to passthrough instead of breaking the stream.

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{Value, json};

use crate::detect::FormatContext;
use crate::wire::ApiFormat;

/// Translates one decoded chunk of SSE text into the client's schema.
pub fn map_streaming_chunk(chunk: &str, ctx: &FormatContext) -> String {
    if !ctx.needs_mapping {
        return chunk.to_string();
    }

    let converted: Vec<String> = chunk.split('\n').map(|line| map_line(line, ctx)).collect();
    converted.join("\n")
}

fn map_line(line: &str, ctx: &FormatContext) -> String {
    let Some(payload) = line.strip_prefix("data: ") else {
        return line.to_string();
    };
    if payload == "[DONE]" {
        return line.to_string();
    }
    let Ok(event) = serde_json::from_str::<Value>(payload) else {
        return line.to_string();
    };

    // `None` means the event has no counterpart in the client's schema; the
    // original line crosses untouched, byte for byte.
    let converted = match (ctx.target, ctx.client) {
        (ApiFormat::Anthropic, ApiFormat::OpenAi) => blocks_event_to_flat(&event),
        (ApiFormat::OpenAi, ApiFormat::Anthropic) => flat_chunk_to_blocks(&event),
        _ => None,
    };
    match converted {
        Some(converted) => format!("data: {converted}"),
        None => line.to_string(),
    }
}

/// Blocks-format stream events to flat-format chunks. Events with no flat
/// counterpart (content_block_start, ping, thinking deltas, ...) yield
/// `None`.
fn blocks_event_to_flat(event: &Value) -> Option<Value> {
    let kind = event.get("type").and_then(Value::as_str).unwrap_or("");

    if kind == "message_start" {
        let message = event.get("message");
        let id = message
            .and_then(|m| m.get("id"))
            .and_then(Value::as_str)
            .unwrap_or("");
        let model = message
            .and_then(|m| m.get("model"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Some(json!({
            "id": id,
            "object": "chat.completion.chunk",
            "created": now_secs(),
            "model": model,
            "choices": [
                {"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}
            ],
        }));
    }

    if kind == "content_block_delta"
        && event
            .get("delta")
            .and_then(|d| d.get("type"))
            .and_then(Value::as_str)
            == Some("text_delta")
    {
        let text = event
            .get("delta")
            .and_then(|d| d.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");
        return Some(json!({
            "id": format!("chatcmpl-{}", now_millis()),
            "object": "chat.completion.chunk",
            "created": now_secs(),
            "model": "unknown",
            "choices": [
                {"index": 0, "delta": {"content": text}, "finish_reason": null}
            ],
        }));
    }

    if kind == "message_delta" {
        let finish_reason = event
            .get("delta")
            .and_then(|d| d.get("stop_reason"))
            .cloned()
            .unwrap_or(Value::Null);
        let mut chunk = json!({
            "id": format!("chatcmpl-{}", now_millis()),
            "object": "chat.completion.chunk",
            "created": now_secs(),
            "model": "unknown",
            "choices": [
                {"index": 0, "delta": {}, "finish_reason": finish_reason}
            ],
        });
        if let Some(usage) = event.get("usage")
            && !usage.is_null()
        {
            let input = usage
                .get("input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            let output = usage
                .get("output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            chunk["usage"] = json!({
                "prompt_tokens": input,
                "completion_tokens": output,
                "total_tokens": input + output,
            });
        }
        return Some(chunk);
    }

    None
}

/// Flat-format chunks to blocks-format stream events. Chunks carrying only
/// things the blocks stream cannot say (tool-call deltas, empty heartbeat
/// deltas) yield `None`.
fn flat_chunk_to_blocks(chunk: &Value) -> Option<Value> {
    if chunk.get("object").and_then(Value::as_str) != Some("chat.completion.chunk") {
        return None;
    }
    let choice = chunk.get("choices").and_then(|c| c.get(0));
    let delta = choice.and_then(|c| c.get("delta"));

    let role = delta
        .and_then(|d| d.get("role"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if !role.is_empty() {
        return Some(json!({
            "type": "message_start",
            "message": {
                "id": chunk.get("id").and_then(Value::as_str).unwrap_or(""),
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": chunk.get("model").and_then(Value::as_str).unwrap_or(""),
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 1},
            },
        }));
    }

    let content = delta
        .and_then(|d| d.get("content"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if !content.is_empty() {
        return Some(json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": content},
        }));
    }

    let finish_reason = choice.and_then(|c| c.get("finish_reason"));
    if let Some(reason) = finish_reason
        && !reason.is_null()
    {
        let mut event = json!({
            "type": "message_delta",
            "delta": {"stop_reason": reason, "stop_sequence": null},
        });
        if let Some(usage) = chunk.get("usage")
            && !usage.is_null()
        {
            event["usage"] = json!({
                "input_tokens": usage.get("prompt_tokens").cloned().unwrap_or(json!(0)),
                "output_tokens": usage.get("completion_tokens").cloned().unwrap_or(json!(0)),
            });
        }
        return Some(event);
    }

    None
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_flat() -> FormatContext {
        // Client speaks flat, upstream streams blocks events.
        FormatContext::new(ApiFormat::OpenAi, Some(ApiFormat::Anthropic))
    }

    fn to_blocks() -> FormatContext {
        FormatContext::new(ApiFormat::Anthropic, Some(ApiFormat::OpenAi))
    }

    fn payload(line: &str) -> Value {
        serde_json::from_str(line.strip_prefix("data: ").unwrap()).unwrap()
    }

    #[test]
    fn identity_context_passes_chunks_through() {
        let chunk = "data: {\"anything\":1}\n\ndata: [DONE]\n\n";
        let ctx = FormatContext::new(ApiFormat::OpenAi, None);
        assert_eq!(map_streaming_chunk(chunk, &ctx), chunk);
    }

    #[test]
    fn text_delta_becomes_flat_content_delta() {
        let chunk = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["object"], "chat.completion.chunk");
        assert_eq!(event["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(event["choices"][0]["finish_reason"], Value::Null);
        assert!(out.ends_with("\n\n"));
    }

    #[test]
    fn message_start_becomes_role_chunk() {
        let chunk = "data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"m\",\"usage\":{\"input_tokens\":5,\"output_tokens\":1}}}\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["id"], "msg_1");
        assert_eq!(event["model"], "m");
        assert_eq!(event["choices"][0]["delta"]["role"], "assistant");
    }

    #[test]
    fn message_delta_carries_finish_reason_and_usage() {
        let chunk = "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":{\"input_tokens\":10,\"output_tokens\":4}}\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["choices"][0]["finish_reason"], "end_turn");
        assert_eq!(event["usage"]["prompt_tokens"], 10);
        assert_eq!(event["usage"]["completion_tokens"], 4);
        assert_eq!(event["usage"]["total_tokens"], 14);
    }

    #[test]
    fn null_usage_on_message_delta_is_omitted() {
        let chunk = "data: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\",\"stop_sequence\":null},\"usage\":null}\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["choices"][0]["finish_reason"], "end_turn");
        assert!(event.get("usage").is_none());
    }

    #[test]
    fn unknown_event_kinds_pass_through_unchanged() {
        let chunk = "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t\"}}\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        assert_eq!(
            payload(out.lines().next().unwrap()),
            payload(chunk.lines().next().unwrap())
        );

        let ping = "data: {\"type\":\"ping\"}\n\n";
        let out = map_streaming_chunk(ping, &to_flat());
        assert_eq!(out, ping);
    }

    #[test]
    fn non_data_lines_and_sentinel_pass_through() {
        let chunk = "event: message_stop\ndata: [DONE]\n\n: keep-alive\n\n";
        assert_eq!(map_streaming_chunk(chunk, &to_flat()), chunk);
    }

    #[test]
    fn undecodable_payload_passes_through() {
        let chunk = "data: {broken json\n\n";
        assert_eq!(map_streaming_chunk(chunk, &to_flat()), chunk);
        assert_eq!(map_streaming_chunk(chunk, &to_blocks()), chunk);
    }

    #[test]
    fn role_chunk_becomes_message_start() {
        let chunk = "data: {\"id\":\"chatcmpl-9\",\"object\":\"chat.completion.chunk\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"},\"finish_reason\":null}]}\n\n";
        let out = map_streaming_chunk(chunk, &to_blocks());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["type"], "message_start");
        assert_eq!(event["message"]["id"], "chatcmpl-9");
        assert_eq!(event["message"]["model"], "m");
        assert_eq!(event["message"]["content"], json!([]));
        assert_eq!(event["message"]["usage"]["output_tokens"], 1);
    }

    #[test]
    fn content_chunk_becomes_text_delta() {
        let chunk = "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"},\"finish_reason\":null}]}\n\n";
        let out = map_streaming_chunk(chunk, &to_blocks());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(
            event,
            json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": "Hello"},
            })
        );
    }

    #[test]
    fn finish_chunk_becomes_message_delta() {
        let chunk = "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":6,\"completion_tokens\":3,\"total_tokens\":9}}\n\n";
        let out = map_streaming_chunk(chunk, &to_blocks());
        let event = payload(out.lines().next().unwrap());
        assert_eq!(event["type"], "message_delta");
        assert_eq!(event["delta"]["stop_reason"], "stop");
        assert_eq!(event["delta"]["stop_sequence"], Value::Null);
        assert_eq!(event["usage"]["input_tokens"], 6);
        assert_eq!(event["usage"]["output_tokens"], 3);
    }

    #[test]
    fn empty_delta_chunk_passes_through() {
        // No role, no content, no finish reason: nothing to say in the
        // blocks stream, so the chunk crosses unchanged.
        let chunk = "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":null}]}\n\n";
        assert_eq!(map_streaming_chunk(chunk, &to_blocks()), chunk);
    }

    #[test]
    fn tool_call_delta_chunk_passes_through() {
        let chunk = "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"a\\\"\"}}]},\"finish_reason\":null}]}\n\n";
        assert_eq!(map_streaming_chunk(chunk, &to_blocks()), chunk);
    }

    #[test]
    fn split_and_whole_streams_translate_identically() {
        // One event per chunk versus the same events in a single chunk.
        let events = [
            "data: {\"object\":\"chat.completion.chunk\",\"id\":\"c1\",\"model\":\"m\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"},\"finish_reason\":null}]}\n\n",
            "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        ];
        let ctx = to_blocks();
        let from_parts: String = events.iter().map(|e| map_streaming_chunk(e, &ctx)).collect();
        let whole: String = events.concat();
        assert_eq!(from_parts, map_streaming_chunk(&whole, &ctx));
    }

    #[test]
    fn multi_event_chunk_translates_line_by_line() {
        let chunk = "data: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"a\"}}\n\ndata: {\"type\":\"ping\"}\n\ndata: [DONE]\n\n";
        let out = map_streaming_chunk(chunk, &to_flat());
        let lines: Vec<&str> = out.split('\n').collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(payload(lines[0])["choices"][0]["delta"]["content"], "a");
        assert_eq!(lines[1], "");
        assert_eq!(lines[2], "data: {\"type\":\"ping\"}");
        assert_eq!(lines[4], "data: [DONE]");
        assert_eq!(lines[6], "");
    }
}

//! Client wire-format detection and the per-request translation context.

use serde_json::Value;
use tracing::debug;

use crate::constants::ANTHROPIC_MESSAGES_PATH;
use crate::wire::ApiFormat;

/// Everything the mappers need to know about one request: which schema the
/// client spoke, which schema the upstream speaks, and whether those differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatContext {
    pub client: ApiFormat,
    pub target: ApiFormat,
    pub needs_mapping: bool,
}

impl FormatContext {
    /// Builds the context for one request. With no configured target format
    /// the upstream is assumed to speak whatever the client spoke, which
    /// turns every mapper into the identity.
    pub fn new(client: ApiFormat, target_override: Option<ApiFormat>) -> Self {
        let target = target_override.unwrap_or(client);
        let ctx = FormatContext {
            client,
            target,
            needs_mapping: client != target,
        };
        debug!(
            client = %ctx.client,
            target = %ctx.target,
            mapping = ctx.needs_mapping,
            "resolved format context"
        );
        ctx
    }
}

/// Determines which schema the client spoke, from the request path first and
/// the body shape only as a fallback.
///
/// The body heuristic: a `max_tokens` field next to a `messages` array with
/// no system-role message is the blocks format (it keeps `system` top-level
/// and requires `max_tokens`). Everything else is treated as the flat format,
/// the more common dialect among local tooling.
pub fn detect_client_format(path: &str, body: &Value) -> ApiFormat {
    if path.contains(ANTHROPIC_MESSAGES_PATH) {
        return ApiFormat::Anthropic;
    }
    if path.contains("/chat/completions") {
        return ApiFormat::OpenAi;
    }

    let has_max_tokens = body
        .get("max_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(0)
        > 0;
    let messages = body.get("messages").and_then(Value::as_array);
    if has_max_tokens
        && let Some(messages) = messages
    {
        let has_system_role = messages
            .iter()
            .any(|m| m.get("role").and_then(Value::as_str) == Some("system"));
        if !has_system_role {
            return ApiFormat::Anthropic;
        }
    }
    ApiFormat::OpenAi
}

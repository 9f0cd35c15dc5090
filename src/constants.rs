/// Messages-style endpoint path (conversational blocks format)
pub const ANTHROPIC_MESSAGES_PATH: &str = "/v1/messages";

/// Chat-completions-style endpoint path (flat tool-calls format)
pub const OPENAI_CHAT_PATH: &str = "/v1/chat/completions";

/// Default upstream base URL when TARGET_API_URL is unset
pub const DEFAULT_UPSTREAM_URL: &str = "https://api.openai.com/v1";

/// Default listen port
pub const DEFAULT_PORT: u16 = 4015;

/// Default upstream request timeout in seconds, sized for long streaming
/// responses
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// max_tokens filled in when converting a request into the blocks format,
/// which requires the field, and the client did not send one
pub const DEFAULT_MAX_TOKENS: u64 = 1024;

/// Largest accepted request body (the upstream APIs accept multi-megabyte
/// image payloads, so be generous)
pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

/// Result text substituted for a tool call that has no recorded outcome
pub const PLACEHOLDER_TOOL_RESULT: &str = "Tool call completed.";

/// Text block prefixed to a synthesized user turn carrying repaired tool
/// results
pub const CONTINUATION_TEXT: &str = "Continuing.";

/// Tool name used when a tool invocation has to be manufactured for an
/// orphaned tool result
pub const MANUFACTURED_TOOL_NAME: &str = "unknown_tool";

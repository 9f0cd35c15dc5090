//! SSE passthrough with on-the-fly schema translation.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::Stream;
use tokio::time::interval;
use tracing::warn;

use crate::detect::FormatContext;
use crate::error::ProxyError;
use crate::transforms::map_streaming_chunk;
use crate::usage::{TokenUsage, UsageTracker, usage_from_chunk};

use super::upstream_error_response;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const KEEP_ALIVE_COMMENT: &str = ": keep-alive\n\n";

/// Emitted when the upstream connection dies mid-stream, so the client sees
/// a well-formed terminated stream instead of a silent truncation.
const STREAM_ERROR_EVENT: &str =
    "data: {\"error\":{\"message\":\"Stream read error\",\"type\":\"stream_error\"}}\n\n";

/// Sends the prepared request and relays the upstream SSE stream back to the
/// client, translating events between schemas when the formats differ.
pub async fn relay_streaming(
    request: reqwest::RequestBuilder,
    ctx: FormatContext,
    usage: Arc<UsageTracker>,
    credential_name: String,
) -> Response {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return ProxyError::NetworkError(e).respond(ctx.client),
    };

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return upstream_error_response(status, &text);
    }

    let sse = translate_stream(response.bytes_stream(), ctx, usage, credential_name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(sse))
        .unwrap()
}

/// Bridges the upstream byte stream to the client's SSE dialect.
///
/// Bytes are decoded incrementally (a multi-byte character may split across
/// network chunks), complete lines are translated and forwarded, and a
/// comment line goes out whenever the upstream stays silent too long. Usage
/// is read off the raw upstream events before translation, since mapping
/// reshapes the fields it lives in; the last report wins and is recorded
/// once the stream ends.
fn translate_stream<S, E>(
    body: S,
    ctx: FormatContext,
    usage: Arc<UsageTracker>,
    credential_name: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    stream! {
        use futures_util::StreamExt;

        let mut body = std::pin::pin!(body);
        let mut decoder = Utf8Carry::default();
        let mut pending = String::new();
        let mut observed: Option<TokenUsage> = None;
        let mut keep_alive = interval(KEEP_ALIVE_INTERVAL);
        keep_alive.reset(); // Don't fire immediately

        loop {
            tokio::select! {
                biased; // Prefer data over keep-alive when both ready

                chunk_opt = body.next() => {
                    let Some(chunk_result) = chunk_opt else {
                        break; // Stream ended
                    };

                    match chunk_result {
                        Ok(bytes) => {
                            pending.push_str(&decoder.decode(&bytes));

                            // Forward complete lines only; a line still
                            // missing its newline waits for the next chunk.
                            if let Some(cut) = pending.rfind('\n') {
                                let ready: String = pending.drain(..=cut).collect();
                                if let Some(report) = usage_from_chunk(&ready) {
                                    observed = Some(report);
                                }
                                yield Ok(Bytes::from(map_streaming_chunk(&ready, &ctx)));
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "upstream stream read failed");
                            yield Ok(Bytes::from(STREAM_ERROR_EVENT));
                            yield Ok(Bytes::from("data: [DONE]\n\n"));
                            let tokens = observed.map(|u| u.total_tokens).unwrap_or(0);
                            usage.record(&credential_name, tokens).await;
                            return;
                        }
                    }
                }

                // Keep-alive timer fired
                _ = keep_alive.tick() => {
                    yield Ok(Bytes::from(KEEP_ALIVE_COMMENT));
                }
            }
        }

        // Flush remaining buffer: upstreams may end without a trailing
        // newline.
        pending.push_str(&decoder.flush());
        if !pending.is_empty() {
            if let Some(report) = usage_from_chunk(&pending) {
                observed = Some(report);
            }
            yield Ok(Bytes::from(map_streaming_chunk(&pending, &ctx)));
        }

        // Record usage after stream ends
        let tokens = observed.map(|u| u.total_tokens).unwrap_or(0);
        usage.record(&credential_name, tokens).await;
    }
}

/// Incremental UTF-8 decoder. Bytes of a character split across chunks are
/// held back until the rest arrives; truly invalid bytes become U+FFFD.
#[derive(Default)]
struct Utf8Carry {
    partial: Vec<u8>,
}

impl Utf8Carry {
    fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.partial);
        buf.extend_from_slice(bytes);

        let mut out = String::new();
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&rest[..valid]).unwrap_or(""));
                    match err.error_len() {
                        Some(bad) => {
                            out.push('\u{FFFD}');
                            rest = &rest[valid + bad..];
                        }
                        None => {
                            // Incomplete trailing sequence, keep it for the
                            // next chunk.
                            self.partial = rest[valid..].to_vec();
                            return out;
                        }
                    }
                }
            }
        }
    }

    /// Drains whatever incomplete bytes remain at end of stream.
    fn flush(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        tail
    }
}

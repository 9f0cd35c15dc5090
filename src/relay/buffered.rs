//! Buffered delivery: whole-body exchange with schema translation.

use std::sync::Arc;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tracing::warn;

use crate::detect::FormatContext;
use crate::error::ProxyError;
use crate::transforms::map_response;
use crate::usage::{UsageTracker, usage_from_response};

use super::upstream_error_response;

/// Sends the prepared request, buffers the upstream body, translates it to
/// the client's schema, and answers with the upstream's own status code.
pub async fn relay_buffered(
    request: reqwest::RequestBuilder,
    ctx: FormatContext,
    usage: Arc<UsageTracker>,
    credential_name: String,
) -> Response {
    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => return ProxyError::NetworkError(e).respond(ctx.client),
    };

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return upstream_error_response(status, &text);
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    if !content_type.contains("application/json") {
        warn!(content_type = %content_type, "upstream answered with a non-JSON body");
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Invalid response format",
                "message": "API returned non-JSON response",
                "contentType": content_type,
            })),
        )
            .into_response();
    }

    let payload = match response.json::<Value>().await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "upstream body did not parse as JSON");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": "Response parsing failed",
                    "message": "Could not parse API response as JSON",
                })),
            )
                .into_response();
        }
    };

    let tokens = usage_from_response(&payload)
        .map(|u| u.total_tokens)
        .unwrap_or(0);
    usage.record(&credential_name, tokens).await;

    let mapped = map_response(payload, &ctx);
    (
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::OK),
        Json(mapped),
    )
        .into_response()
}

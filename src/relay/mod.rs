//! Upstream delivery, one module per response mode.
//!
//! Both paths send the prepared request with the rotated credential, forward
//! upstream rejections with their original status, and record token usage
//! against the credential that served the exchange.

mod buffered;
mod streaming;

pub use buffered::relay_buffered;
pub use streaming::relay_streaming;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

/// Upstream said no: keep its status code and surface a compact summary of
/// the body. HTML error pages (reverse proxies in front of the API like to
/// serve those) are collapsed to a fixed note instead of 200 chars of markup.
fn upstream_error_response(status: reqwest::StatusCode, body: &str) -> Response {
    error!(status = %status, body = %truncate_chars(body, 500), "upstream rejected request");

    let details = if body.starts_with("<!DOCTYPE") {
        "HTML error page returned".to_string()
    } else {
        truncate_chars(body, 200)
    };

    (
        StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY),
        Json(json!({
            "error": format!("API Error: {}", status.as_u16()),
            "message": status.canonical_reason().unwrap_or(""),
            "details": details,
        })),
    )
        .into_response()
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

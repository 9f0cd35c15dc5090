//! Catch-all dispatch: every otherwise-unmatched route is proxied upstream.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{OriginalUri, State};
use axum::http::Method;
use axum::response::Response;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::detect::{FormatContext, detect_client_format};
use crate::error::ProxyError;
use crate::relay::{relay_buffered, relay_streaming};
use crate::transforms::{map_request, target_endpoint};

/// One proxied exchange, start to finish: detect the client's schema, pick
/// the next credential, translate the body and endpoint, and hand off to the
/// relay matching the client's streaming choice.
pub async fn dispatch(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    body: Bytes,
) -> Response {
    let request_id = Uuid::new_v4();

    let path = uri.path();
    let path = match &state.config.path_prefix {
        Some(prefix) => path.strip_prefix(prefix.as_str()).unwrap_or(path),
        None => path,
    };

    // Bodyless requests (GET passthroughs mostly) dispatch as an empty
    // object so detection and the model override have something to look at.
    let mut payload: Value = if body.is_empty() {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(%request_id, error = %e, "request body is not valid JSON");
                let client = detect_client_format(path, &Value::Null);
                return ProxyError::InvalidBody.respond(client);
            }
        }
    };

    let client = detect_client_format(path, &payload);
    let ctx = FormatContext::new(client, state.config.target_format);

    if let Some(model) = &state.config.model
        && let Some(obj) = payload.as_object_mut()
    {
        obj.insert("model".to_string(), Value::String(model.clone()));
    }

    let streaming = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let (index, credential) = state.keys.next();
    info!(
        %request_id,
        method = %method,
        path,
        format = %client,
        credential = index + 1,
        credentials_total = state.keys.len(),
        streaming,
        "dispatching upstream"
    );

    let mapped = map_request(payload, &ctx);
    let endpoint = target_endpoint(path, &ctx);
    let url = match uri.query() {
        Some(query) => format!("{}{}?{}", state.config.target_api_url, endpoint, query),
        None => format!("{}{}", state.config.target_api_url, endpoint),
    };

    let mut request = state
        .http_client
        .request(method.clone(), &url)
        .bearer_auth(credential);
    if method != Method::GET && method != Method::HEAD {
        request = request.json(&mapped);
    }

    let credential_name = credential.to_string();
    if streaming {
        relay_streaming(request, ctx, Arc::clone(&state.usage), credential_name).await
    } else {
        relay_buffered(request, ctx, Arc::clone(&state.usage), credential_name).await
    }
}

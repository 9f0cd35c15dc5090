//! Usage reporting endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::AppState;

/// Cumulative and windowed usage for every configured credential.
///
/// Credentials appear under a stable fingerprint, never as key material.
pub async fn usage_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let mut total_tokens: u64 = 0;
    let mut total_requests: u64 = 0;
    let mut per_key = Vec::with_capacity(state.keys.len());

    for key in state.keys.keys() {
        let snap = state.usage.snapshot(key).await;
        total_tokens += snap.total_tokens;
        total_requests += snap.total_requests;
        per_key.push(json!({
            "name": fingerprint(key),
            "tokensTotal": snap.total_tokens,
            "requestsTotal": snap.total_requests,
            "requestsLastMinute": snap.minute.requests,
            "tokensLastMinute": snap.minute.tokens,
            "requestsLastHour": snap.hour.requests,
            "tokensLastHour": snap.hour.tokens,
            "requestsLastDay": snap.day.requests,
            "tokensLastDay": snap.day.tokens,
        }));
    }

    Json(json!({
        "totalTokensUsed": total_tokens,
        "totalRequests": total_requests,
        "usagePerKeyStats": per_key,
        "generatedAt": chrono::Utc::now().to_rfc3339(),
    }))
}

/// Short stable identifier for a credential.
fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
    format!("key-{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        assert_eq!(fingerprint("sk-alpha"), fingerprint("sk-alpha"));
        assert_ne!(fingerprint("sk-alpha"), fingerprint("sk-beta"));
    }

    #[test]
    fn fingerprints_do_not_leak_the_key() {
        let fp = fingerprint("sk-super-secret");
        assert!(fp.starts_with("key-"));
        assert_eq!(fp.len(), 4 + 12);
        assert!(!fp.contains("secret"));
    }
}

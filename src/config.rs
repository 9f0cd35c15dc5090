use std::env;

use dotenvy::dotenv;
use tracing::warn;

use crate::constants::{DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_UPSTREAM_URL};
use crate::wire::ApiFormat;

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base URL requests are forwarded to, without a trailing slash.
    pub target_api_url: String,
    /// Schema the upstream speaks. `None` means "same as the client".
    pub target_format: Option<ApiFormat>,
    /// When set, overrides the model field of every proxied request.
    pub model: Option<String>,
    pub api_keys: Vec<String>,
    /// Leading path segment to strip before forwarding, e.g. "/proxy".
    pub path_prefix: Option<String>,
    pub request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let target_api_url = env::var("TARGET_API_URL")
            .unwrap_or_else(|_| DEFAULT_UPSTREAM_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        // Fail at startup on a malformed URL, not on the first request.
        url::Url::parse(&target_api_url).expect("TARGET_API_URL must be a valid URL");

        // Unknown format names fall back to auto-detection rather than
        // refusing to start.
        let target_format = match env::var("TARGET_API_FORMAT") {
            Ok(name) => {
                let parsed = ApiFormat::from_name(&name);
                if parsed.is_none() {
                    warn!(format = %name, "unrecognized TARGET_API_FORMAT, auto-detecting instead");
                }
                parsed
            }
            Err(_) => None,
        };

        let model = env::var("MODEL").ok().filter(|m| !m.is_empty());

        let api_keys: Vec<String> = env::var("API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let path_prefix = env::var("PROXY_PATH_PREFIX")
            .ok()
            .filter(|p| !p.is_empty())
            .map(|p| if p.starts_with('/') { p } else { format!("/{p}") });

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Self {
            host,
            port,
            target_api_url,
            target_format,
            model,
            api_keys,
            path_prefix,
            request_timeout_secs,
        }
    }
}

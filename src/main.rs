mod config;
mod constants;
mod detect;
mod error;
mod relay;
mod rotation;
mod routes;
mod transforms;
mod usage;
mod wire;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router, ServiceExt, extract::DefaultBodyLimit};
use clap::Parser;
use reqwest::Client;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use constants::MAX_BODY_BYTES;
use rotation::KeyRotation;
use usage::UsageTracker;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

pub struct AppState {
    pub config: Config,
    pub http_client: Client,
    pub keys: KeyRotation,
    pub usage: Arc<UsageTracker>,
}

#[derive(Parser)]
#[command(name = "polyglot-proxy")]
#[command(about = "Schema-translating reverse proxy for chat completion APIs")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
}

/// A panicking handler answers like any other internal failure instead of
/// dropping the connection.
fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let keys =
        KeyRotation::new(config.api_keys.clone()).expect("API_KEYS must contain at least one key");
    info!(credentials = keys.len(), "credential pool loaded");

    let usage = Arc::new(UsageTracker::new());
    usage::spawn_sweeper(Arc::clone(&usage));

    // Shared HTTP client with connection pooling
    let http_client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    match config.target_format {
        Some(format) => {
            info!(upstream = %config.target_api_url, %format, "upstream format pinned")
        }
        None => {
            info!(upstream = %config.target_api_url, "upstream format will mirror each client")
        }
    }

    let state = Arc::new(AppState {
        config,
        http_client,
        keys,
        usage,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::CACHE_CONTROL,
        ]);

    let app = NormalizePath::trim_trailing_slash(
        Router::new()
            .route("/health", get(routes::health::health))
            .route("/version", get(routes::health::version))
            .route("/usage-status", get(routes::stats::usage_status))
            .route("/", any(routes::proxy::dispatch))
            .route("/{*path}", any(routes::proxy::dispatch))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(cors)
            .with_state(state),
    );

    let addr: SocketAddr = format!("{}:{}", host, port).parse().expect("Invalid address");
    info!(
        "Starting polyglot-proxy v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    .unwrap();
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::wire::ApiFormat;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid JSON body")]
    InvalidBody,

    #[error("No upstream API keys configured")]
    NoCredentials,

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

impl ProxyError {
    fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBody => StatusCode::BAD_REQUEST,
            ProxyError::NoCredentials => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::NetworkError(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Render in the schema the client spoke.
    pub fn respond(&self, format: ApiFormat) -> Response {
        match format {
            ApiFormat::Anthropic => self.to_anthropic_response(),
            ApiFormat::OpenAi => self.to_openai_response(),
        }
    }

    /// Convert error to a flat-format error response
    pub fn to_openai_response(&self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }

    /// Convert error to a blocks-format error response
    pub fn to_anthropic_response(&self) -> Response {
        let error_type = match self {
            ProxyError::InvalidBody => "invalid_request_error",
            ProxyError::NoCredentials | ProxyError::NetworkError(_) => "api_error",
        };

        (
            self.status(),
            Json(json!({
                "type": "error",
                "error": {
                    "type": error_type,
                    "message": self.to_string()
                }
            })),
        )
            .into_response()
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        // Default to the flat format
        self.to_openai_response()
    }
}

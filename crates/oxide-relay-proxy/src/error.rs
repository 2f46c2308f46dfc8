//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use oxide_relay_core::llm::RouteError;
use serde::Serialize;
use thiserror::Error;

/// Request failures the proxy reports before any body byte is sent
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Missing or wrong `api_key`
    #[error("Invalid API key")]
    Unauthorized,
    /// Malformed request
    #[error("{0}")]
    BadRequest(String),
    /// Model not in the registry
    #[error("Invalid model name: {0}")]
    UnknownModel(String),
    /// Every provider attempt failed
    #[error("All providers failed for {model}: {message}")]
    Exhausted {
        /// Requested logical model
        model: String,
        /// Attempts made
        attempts: usize,
        /// Last provider error
        message: String,
    },
    /// Anything else on the backend side
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    attempts: Option<usize>,
}

impl ProxyError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::UnknownModel(_) => StatusCode::BAD_REQUEST,
            Self::Exhausted { .. } => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable kind, matched by relay clients.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::UnknownModel(_) => "unknown_model",
            Self::Exhausted { .. } => "providers_exhausted",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RouteError> for ProxyError {
    fn from(err: RouteError) -> Self {
        match err {
            RouteError::Validation(msg) => Self::BadRequest(msg),
            RouteError::UnknownModel(model) => Self::UnknownModel(model),
            RouteError::AllProvidersExhausted {
                model,
                attempts,
                last,
            } => Self::Exhausted {
                model,
                attempts,
                message: last.to_string(),
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let attempts = match &self {
            Self::Exhausted { attempts, .. } => Some(*attempts),
            _ => None,
        };
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
            attempts,
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_relay_core::llm::LlmError;

    #[test]
    fn test_exhaustion_maps_to_bad_gateway() {
        let err = ProxyError::from(RouteError::AllProvidersExhausted {
            model: "llama".into(),
            attempts: 3,
            last: LlmError::ApiError("500".into()),
        });
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.kind(), "providers_exhausted");
    }

    #[test]
    fn test_route_validation_is_bad_request() {
        let err = ProxyError::from(RouteError::UnknownModel("nope".into()));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind(), "unknown_model");
    }
}

//! Standardized translation between upstream failures, proxy errors and HTTP responses

use super::ProxyError;
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::time::Duration;

/// Maps transport-level failures from upstream calls onto the proxy error taxonomy
pub struct UpstreamErrorHandler;

impl UpstreamErrorHandler {
    /// Classify a failed upstream call. `context` names the step, e.g. "challenge probe".
    pub fn from_transport(err: reqwest::Error, context: &str) -> ProxyError {
        if err.is_timeout() {
            ProxyError::UpstreamTimeout(format!("{} timed out: {}", context, err))
        } else if err.is_connect() {
            ProxyError::UpstreamUnreachable(format!("{} could not connect: {}", context, err))
        } else if err.is_redirect() {
            ProxyError::UpstreamUnreachable(format!("{} hit a redirect loop: {}", context, err))
        } else if err.is_builder() {
            ProxyError::InvalidRequest(format!("{} produced an invalid request: {}", context, err))
        } else {
            ProxyError::UpstreamUnreachable(format!("{} failed: {}", context, err))
        }
    }

    /// Response headers did not arrive within the configured window
    pub fn elapsed(context: &str, limit: Duration) -> ProxyError {
        ProxyError::UpstreamTimeout(format!(
            "{} received no response within {}s",
            context,
            limit.as_secs()
        ))
    }
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnknownHost { .. } => StatusCode::NOT_FOUND,
            ProxyError::MalformedChallenge(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code in the registry error envelope
    pub fn error_code(&self) -> &'static str {
        match self {
            ProxyError::UnknownHost { .. } => "UNKNOWN_HOST",
            ProxyError::MalformedChallenge(_) => "MALFORMED_CHALLENGE",
            ProxyError::UpstreamUnreachable(_) => "UPSTREAM_UNREACHABLE",
            ProxyError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ProxyError::InvalidRequest(_) => "INVALID_REQUEST",
            ProxyError::Config(_) => "CONFIG_ERROR",
            ProxyError::Internal(_) => "INTERNAL_ERROR",
            ProxyError::Io(_) => "IO_ERROR",
            ProxyError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        let body = match &self {
            ProxyError::UnknownHost { host, routes } => json!({
                "errors": [{ "code": code, "message": message, "detail": { "host": host } }],
                "routes": routes,
            }),
            _ => json!({
                "errors": [{ "code": code, "message": message, "detail": null }],
            }),
        };

        let mut response = (status, Json(body)).into_response();
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ProxyError::MalformedChallenge("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout("x".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            ProxyError::UpstreamUnreachable("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        let unknown = ProxyError::UnknownHost {
            host: "nope.example".into(),
            routes: BTreeMap::new(),
        };
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(unknown.error_code(), "UNKNOWN_HOST");
    }

    #[test]
    fn test_elapsed_is_timeout() {
        let err = UpstreamErrorHandler::elapsed("token relay", Duration::from_secs(5));
        assert!(matches!(err, ProxyError::UpstreamTimeout(_)));
        assert!(err.to_string().contains("5s"));
    }
}

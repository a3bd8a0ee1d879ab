//! Error types for the relay and their mapping onto client-facing responses

pub mod handlers;

use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// No route matches the inbound hostname
    #[error("No upstream configured for host: {host}")]
    UnknownHost {
        host: String,
        /// Known routes, reported back to the client for diagnostics
        routes: BTreeMap<String, String>,
    },

    /// The upstream's `WWW-Authenticate` header could not be parsed
    #[error("Malformed upstream challenge: {0}")]
    MalformedChallenge(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// The inbound request cannot be proxied at all
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<url::ParseError> for ProxyError {
    fn from(err: url::ParseError) -> Self {
        ProxyError::InvalidRequest(format!("URL error: {}", err))
    }
}

impl From<axum::http::Error> for ProxyError {
    fn from(err: axum::http::Error) -> Self {
        ProxyError::Internal(format!("Failed to build response: {}", err))
    }
}

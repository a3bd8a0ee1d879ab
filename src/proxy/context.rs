//! Per-request context and endpoint dispatch

use crate::cli::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::proxy::routes::Route;
use axum::http::{HeaderMap, HeaderValue, Method, header, request::Parts};

/// Path of the proxy's own token endpoint
pub const TOKEN_RELAY_PATH: &str = "/v2/auth";

/// The three logical endpoints of a proxied registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/v2/`: API version check, answered with the proxy's own challenge
    ChallengeProbe,
    /// `/v2/auth`: token issuance relayed to the upstream realm
    TokenRelay,
    /// Everything else
    DataPlane,
}

impl Endpoint {
    pub fn classify(path: &str, route: &Route) -> Self {
        if !route.kind.speaks_registry_auth() {
            return Endpoint::DataPlane;
        }
        match path {
            "/v2/" | "/v2" => Endpoint::ChallengeProbe,
            TOKEN_RELAY_PATH => Endpoint::TokenRelay,
            _ => Endpoint::DataPlane,
        }
    }
}

/// Everything one request handler needs, fixed at construction
#[derive(Debug, Clone)]
pub struct ProxyRequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub route: Route,
    /// Host the client used to reach us, port included
    pub proxy_host: String,
    /// Absolute URL of our token endpoint as advertised to the client
    pub auth_realm: String,
    pub endpoint: Endpoint,
}

impl ProxyRequestContext {
    pub fn new(
        request_id: String,
        parts: &Parts,
        proxy_host: String,
        route: Route,
        config: &ProxyConfig,
    ) -> Self {
        let path = parts.uri.path().to_string();
        let endpoint = Endpoint::classify(&path, &route);
        let auth_realm = match (&config.local_address, config.debug) {
            (Some(local), true) => format!("{}{}", local.trim_end_matches('/'), TOKEN_RELAY_PATH),
            _ => format!("{}://{}{}", config.public_scheme, proxy_host, TOKEN_RELAY_PATH),
        };

        Self {
            request_id,
            method: parts.method.clone(),
            path,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers.clone(),
            route,
            proxy_host,
            auth_realm,
            endpoint,
        }
    }

    /// Host the client addressed, from `Host` or the absolute request URI
    pub fn inbound_host(parts: &Parts) -> Result<String> {
        let from_header = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let host = from_header
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
            .ok_or_else(|| ProxyError::InvalidRequest("Request has no Host".to_string()))?;
        Ok(host)
    }

    pub fn header(&self, name: header::HeaderName) -> Option<&HeaderValue> {
        self.headers.get(name)
    }

    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.headers.get(header::AUTHORIZATION)
    }

    /// `path?query` exactly as received
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    /// Upstream URL for this request: base + original path + original query
    pub fn target_url(&self) -> Result<url::Url> {
        Ok(url::Url::parse(&format!(
            "{}{}",
            self.route.base(),
            self.path_and_query()
        ))?)
    }
}

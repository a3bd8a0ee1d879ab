//! Capability probe against an upstream's `/v2/` and the proxy-scoped challenge

use crate::error::{ProxyError, Result};
use crate::logging::Logger;
use crate::proxy::context::ProxyRequestContext;
use crate::proxy::routes::Route;
use crate::proxy::transport::{UpstreamTransport, passthrough};
use crate::registry::challenge::AuthChallenge;
use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

const API_VERSION_HEADER: &str = "docker-distribution-api-version";

/// Outcome of one `GET <upstream>/v2/`
#[derive(Debug)]
pub enum ProbeResult {
    /// Upstream answered 2xx/3xx: readable as-is with the given credentials
    Authenticated(reqwest::Response),
    /// Upstream demands a bearer token from this realm
    ChallengeRequired(AuthChallenge),
    /// Upstream refused for a reason other than missing auth; delivered unchanged
    UpstreamError(reqwest::Response),
}

#[derive(Debug, Clone)]
pub struct AuthProber {
    transport: UpstreamTransport,
    output: Logger,
}

impl AuthProber {
    pub fn new(transport: UpstreamTransport, output: Logger) -> Self {
        Self { transport, output }
    }

    /// Probe the upstream's API root. Only the client's `Authorization`
    /// travels with the probe.
    pub async fn probe(&self, route: &Route, authorization: Option<&HeaderValue>) -> Result<ProbeResult> {
        let url = format!("{}/v2/", route.base());
        self.output.detail(&format!("Probing {}", url));

        let mut request = self.transport.client(true).get(&url);
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization.clone());
        }
        let response = self.transport.send(request, "challenge probe").await?;

        let status = response.status();
        self.output.detail(&format!("Probe status: {}", status));

        if status == StatusCode::UNAUTHORIZED {
            let challenge = challenge_from_headers(response.headers())?;
            self.output.detail(&format!(
                "Upstream challenge: realm={}, service={}",
                challenge.realm, challenge.service
            ));
            return Ok(ProbeResult::ChallengeRequired(challenge));
        }

        if status.is_client_error() || status.is_server_error() {
            self.output
                .warning(&format!("Upstream {} rejected probe with {}", route.base(), status));
            return Ok(ProbeResult::UpstreamError(response));
        }

        Ok(ProbeResult::Authenticated(response))
    }

    /// Answer the client's `/v2/` version check
    pub async fn handle_version_check(&self, ctx: &ProxyRequestContext) -> Result<Response> {
        match self.probe(&ctx.route, ctx.authorization()).await? {
            ProbeResult::ChallengeRequired(challenge) => {
                Ok(challenge_response(&ctx.auth_realm, &challenge.service, None))
            }
            ProbeResult::Authenticated(response) | ProbeResult::UpstreamError(response) => {
                Ok(passthrough(response))
            }
        }
    }
}

/// Pick the Bearer challenge out of a 401's `WWW-Authenticate` headers.
///
/// Registries may list several schemes; the first Bearer one that parses wins.
pub fn challenge_from_headers(headers: &axum::http::HeaderMap) -> Result<AuthChallenge> {
    let mut first_error = None;
    for value in headers.get_all(header::WWW_AUTHENTICATE) {
        let value = match value.to_str() {
            Ok(value) => value,
            Err(_) => {
                first_error.get_or_insert_with(|| {
                    ProxyError::MalformedChallenge("non-ASCII WWW-Authenticate header".to_string())
                });
                continue;
            }
        };
        match AuthChallenge::parse(value) {
            Ok(challenge) => return Ok(challenge),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    Err(first_error.unwrap_or_else(|| {
        ProxyError::MalformedChallenge("401 without WWW-Authenticate header".to_string())
    }))
}

/// The 401 the client sees: same service, but the realm is always ours
pub fn challenge_response(realm: &str, service: &str, scope: Option<&str>) -> Response {
    let body = Json(json!({
        "errors": [{
            "code": "UNAUTHORIZED",
            "message": "authentication required",
            "detail": null,
        }]
    }));
    let mut response = (StatusCode::UNAUTHORIZED, body).into_response();

    let headers = response.headers_mut();
    match HeaderValue::from_str(&AuthChallenge::header_value(realm, service, scope)) {
        Ok(value) => {
            headers.insert(header::WWW_AUTHENTICATE, value);
        }
        Err(_) => {
            return ProxyError::MalformedChallenge(format!(
                "challenge for service '{}' is not a valid header",
                service
            ))
            .into_response();
        }
    }
    headers.insert(API_VERSION_HEADER, HeaderValue::from_static("registry/2.0"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn test_challenge_response_points_at_proxy() {
        let response = challenge_response(
            "https://docker.mirror.test/v2/auth",
            "registry.docker.io",
            None,
        );
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let header = response.headers()[header::WWW_AUTHENTICATE].to_str().unwrap();
        assert_eq!(
            header,
            r#"Bearer realm="https://docker.mirror.test/v2/auth",service="registry.docker.io""#
        );
        assert_eq!(response.headers()[API_VERSION_HEADER], "registry/2.0");
    }

    #[test]
    fn test_challenge_from_headers_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.append(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Basic realm="legacy""#),
        );
        headers.append(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(r#"Bearer realm="https://auth.example.com/token",service="example""#),
        );
        let challenge = challenge_from_headers(&headers).unwrap();
        assert_eq!(challenge.service, "example");
    }

    #[test]
    fn test_challenge_from_headers_without_header_is_malformed() {
        let err = challenge_from_headers(&HeaderMap::new()).unwrap_err();
        assert!(matches!(err, ProxyError::MalformedChallenge(_)));
    }
}

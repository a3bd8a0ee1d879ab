//! Relay of token requests from the proxy's `/v2/auth` to the upstream realm

use crate::error::Result;
use crate::logging::Logger;
use crate::proxy::context::ProxyRequestContext;
use crate::proxy::transport::{UpstreamTransport, passthrough};
use crate::registry::auth::{AuthProber, ProbeResult};
use crate::registry::challenge::AuthChallenge;
use crate::registry::scope::canonicalize_scope;
use axum::http::{HeaderValue, header};
use axum::response::Response;
use url::Url;

const SERVICE_PARAM: &str = "service";
const SCOPE_PARAM: &str = "scope";

#[derive(Debug, Clone)]
pub struct TokenRelay {
    prober: AuthProber,
    transport: UpstreamTransport,
    output: Logger,
}

impl TokenRelay {
    pub fn new(prober: AuthProber, transport: UpstreamTransport, output: Logger) -> Self {
        Self {
            prober,
            transport,
            output,
        }
    }

    pub async fn relay(&self, ctx: &ProxyRequestContext) -> Result<Response> {
        // Anonymous re-probe: the realm is rediscovered on every token request
        let challenge = match self.prober.probe(&ctx.route, None).await? {
            ProbeResult::ChallengeRequired(challenge) => challenge,
            ProbeResult::Authenticated(response) | ProbeResult::UpstreamError(response) => {
                self.output.info(&format!(
                    "Upstream {} issued no challenge ({}), passing through",
                    ctx.route.base(),
                    response.status()
                ));
                return Ok(passthrough(response));
            }
        };

        let token_url = build_token_url(
            &challenge,
            ctx.query.as_deref(),
            ctx.route.kind.is_docker_hub(),
        );
        self.output.detail(&format!(
            "Requesting token from {} (credentials: {})",
            token_url,
            if ctx.authorization().is_some() { "client" } else { "anonymous" }
        ));

        let mut request = self.transport.client(true).get(token_url);
        if let Some(authorization) = ctx.authorization() {
            request = request.header(header::AUTHORIZATION, authorization.clone());
        }
        request = request.header(
            header::ACCEPT,
            ctx.header(header::ACCEPT)
                .cloned()
                .unwrap_or_else(|| HeaderValue::from_static("application/json")),
        );
        if let Some(user_agent) = ctx.header(header::USER_AGENT) {
            request = request.header(header::USER_AGENT, user_agent.clone());
        }

        let response = self.transport.send(request, "token request").await?;
        if !response.status().is_success() {
            self.output.warning(&format!(
                "Token issuer {} answered {}",
                challenge.realm,
                response.status()
            ));
        }
        Ok(passthrough(response))
    }
}

/// Realm URL with `service`, canonical `scope`s, and the client's remaining parameters.
///
/// `service` and `scope` from the client or the realm itself never survive:
/// the canonical values replace them.
pub fn build_token_url(challenge: &AuthChallenge, client_query: Option<&str>, library_namespace: bool) -> Url {
    let is_reserved = |key: &str| key == SERVICE_PARAM || key == SCOPE_PARAM;

    let realm_params: Vec<(String, String)> = challenge
        .realm
        .query_pairs()
        .filter(|(key, _)| !is_reserved(&**key))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut scopes = Vec::new();
    let mut client_params = Vec::new();
    if let Some(query) = client_query {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match &*key {
                SCOPE_PARAM if !value.is_empty() => {
                    scopes.push(canonicalize_scope(&value, library_namespace))
                }
                key if is_reserved(key) => {}
                key if realm_params.iter().any(|(existing, _)| existing == key) => {}
                _ => client_params.push((key.to_string(), value.into_owned())),
            }
        }
    }

    let mut url = challenge.realm.clone();
    url.set_query(None);
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &realm_params {
            pairs.append_pair(key, value);
        }
        pairs.append_pair(SERVICE_PARAM, &challenge.service);
        for scope in &scopes {
            pairs.append_pair(SCOPE_PARAM, scope);
        }
        for (key, value) in &client_params {
            pairs.append_pair(key, value);
        }
    }
    url
}

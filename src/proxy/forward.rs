//! Data-plane forwarding: everything that is not `/v2/` or `/v2/auth`

use crate::error::{ProxyError, Result};
use crate::logging::Logger;
use crate::proxy::context::ProxyRequestContext;
use crate::proxy::rewrite::{BodyPolicy, ResponseRewriter, RewriteRule};
use crate::proxy::transport::{UpstreamTransport, has_request_body, stream_request_body};
use crate::registry::auth::{challenge_from_headers, challenge_response};
use crate::registry::scope::canonical_library_path;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use url::Url;

const X_AMZ_CONTENT_SHA256: HeaderName = HeaderName::from_static("x-amz-content-sha256");
const DOCKER_CONTENT_DIGEST: HeaderName = HeaderName::from_static("docker-content-digest");
const DIGEST: HeaderName = HeaderName::from_static("digest");
const CONTENT_MD5: HeaderName = HeaderName::from_static("content-md5");

const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Client headers that reach the upstream; everything else stays behind
const FORWARDED_HEADERS: [HeaderName; 12] = [
    header::AUTHORIZATION,
    header::ACCEPT,
    header::CONTENT_TYPE,
    header::USER_AGENT,
    X_AMZ_CONTENT_SHA256,
    DIGEST,
    DOCKER_CONTENT_DIGEST,
    CONTENT_MD5,
    header::CONTENT_LENGTH,
    header::CONTENT_RANGE,
    header::RANGE,
    header::IF_NONE_MATCH,
];

/// Headers worth carrying onto a re-issued blob redirect
const REDIRECT_HEADERS: [HeaderName; 3] = [header::ACCEPT, header::USER_AGENT, header::RANGE];

#[derive(Debug, Clone)]
pub struct RequestForwarder {
    transport: UpstreamTransport,
    rewriter: ResponseRewriter,
    output: Logger,
}

impl RequestForwarder {
    pub fn new(transport: UpstreamTransport, rewriter: ResponseRewriter, output: Logger) -> Self {
        Self {
            transport,
            rewriter,
            output,
        }
    }

    pub async fn forward(&self, ctx: &ProxyRequestContext, body: Body) -> Result<Response> {
        let docker_hub = ctx.route.kind.is_docker_hub();

        if docker_hub {
            if let Some(canonical) = canonical_library_path(&ctx.path) {
                return library_redirect(ctx, &canonical);
            }
        }

        let target = ctx.target_url()?;
        self.output
            .detail(&format!("{} {} -> {}", ctx.method, ctx.path, target));

        let mut request = self
            .transport
            .client(!docker_hub)
            .request(ctx.method.clone(), target.clone());
        for name in FORWARDED_HEADERS.iter() {
            for value in ctx.headers.get_all(name) {
                request = request.header(name.clone(), value.clone());
            }
        }
        if docker_hub && !ctx.headers.contains_key(&X_AMZ_CONTENT_SHA256) {
            request = request.header(X_AMZ_CONTENT_SHA256, HeaderValue::from_static(UNSIGNED_PAYLOAD));
        }
        if has_request_body(&body) {
            request = request.body(stream_request_body(body));
        }

        let mut response = self.transport.send(request, "upstream request").await?;

        let mut redirected = false;
        if docker_hub && is_followable_redirect(response.status()) {
            if let Some(location) = redirect_location(&response, &target) {
                response = self.follow_blob_redirect(ctx, location).await?;
                redirected = true;
            }
        }

        // A 401 from blob storage is not a registry challenge
        if response.status() == StatusCode::UNAUTHORIZED
            && ctx.route.kind.speaks_registry_auth()
            && !redirected
        {
            let challenge = challenge_from_headers(response.headers())?;
            self.output.detail(&format!(
                "Upstream demands a token for {} (scope: {})",
                ctx.path,
                challenge.scope.as_deref().unwrap_or("none")
            ));
            return Ok(challenge_response(
                &ctx.auth_realm,
                &challenge.service,
                challenge.scope.as_deref(),
            ));
        }

        if response.status().is_server_error() {
            self.output.warning(&format!(
                "Upstream {} answered {} for {}",
                ctx.route.base(),
                response.status(),
                ctx.path
            ));
        }

        // Storage responses behind a redirect are always blob bytes
        let policy = if redirected {
            BodyPolicy::Verbatim
        } else if ctx.route.kind.speaks_registry_auth() {
            BodyPolicy::for_path(&ctx.path)
        } else {
            BodyPolicy::Rewritable
        };
        let rule = RewriteRule::new(ctx.route.upstream_authority(), ctx.proxy_host.clone());
        self.rewriter.rewrite(response, &rule, &ctx.method, policy).await
    }

    /// Blob storage redirects are fetched here, anonymously, so the client
    /// never needs to reach the storage host itself
    async fn follow_blob_redirect(&self, ctx: &ProxyRequestContext, location: Url) -> Result<reqwest::Response> {
        let method = if ctx.method == Method::HEAD {
            Method::HEAD
        } else {
            Method::GET
        };
        self.output.detail(&format!(
            "Following redirect: {} {}",
            method,
            location.origin().ascii_serialization()
        ));

        let mut request = self.transport.client(true).request(method, location);
        for name in REDIRECT_HEADERS.iter() {
            if let Some(value) = ctx.headers.get(name) {
                request = request.header(name.clone(), value.clone());
            }
        }
        self.transport.send(request, "redirect target").await
    }
}

fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// `Location` resolved against the URL that produced it
fn redirect_location(response: &reqwest::Response, base: &Url) -> Option<Url> {
    let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
    base.join(location.trim()).ok()
}

/// 301 to the `library/`-qualified path, answered without touching the upstream
fn library_redirect(ctx: &ProxyRequestContext, canonical: &str) -> Result<Response> {
    let location = match &ctx.query {
        Some(query) => format!("{}?{}", canonical, query),
        None => canonical.to_string(),
    };
    let location = HeaderValue::from_str(&location)
        .map_err(|_| ProxyError::InvalidRequest(format!("Unusable redirect target: {}", location)))?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::MOVED_PERMANENTLY;
    response.headers_mut().insert(header::LOCATION, location);
    Ok(response)
}

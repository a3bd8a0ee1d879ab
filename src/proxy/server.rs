//! Inbound side: the axum router and the per-request dispatch

use crate::cli::config::ProxyConfig;
use crate::error::Result;
use crate::logging::Logger;
use crate::proxy::context::{Endpoint, ProxyRequestContext};
use crate::proxy::forward::RequestForwarder;
use crate::proxy::rewrite::ResponseRewriter;
use crate::proxy::routes::RouteTable;
use crate::proxy::transport::UpstreamTransport;
use crate::registry::auth::AuthProber;
use crate::registry::token::TokenRelay;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Everything a request handler needs, shared read-only across requests
#[derive(Debug)]
pub struct Relay {
    config: Arc<ProxyConfig>,
    routes: RouteTable,
    prober: AuthProber,
    token_relay: TokenRelay,
    forwarder: RequestForwarder,
    output: Logger,
}

impl Relay {
    pub fn new(config: ProxyConfig, output: Logger) -> Result<Self> {
        let routes = RouteTable::from_config(&config)?;
        let transport = UpstreamTransport::new(&config)?;

        let prober = AuthProber::new(transport.clone(), output.scoped("auth"));
        let token_relay = TokenRelay::new(prober.clone(), transport.clone(), output.scoped("token"));
        let rewriter = ResponseRewriter::new(
            config.max_rewrite_bytes,
            transport.timeout(),
            output.scoped("rewrite"),
        );
        let forwarder = RequestForwarder::new(transport, rewriter, output.scoped("forward"));

        Ok(Self {
            config: Arc::new(config),
            routes,
            prober,
            token_relay,
            forwarder,
            output,
        })
    }

    /// Resolve the route, classify the path and run the matching endpoint
    pub async fn handle(&self, request_id: String, request: Request) -> Result<Response> {
        let (parts, body) = request.into_parts();
        let host = ProxyRequestContext::inbound_host(&parts)?;
        let route = self.routes.resolve_or_error(&host)?.clone();
        let ctx = ProxyRequestContext::new(request_id, &parts, host, route, &self.config);

        self.output.detail(&format!(
            "{:?} via {} ({:?})",
            ctx.endpoint,
            ctx.route.base(),
            ctx.route.kind
        ));

        match ctx.endpoint {
            Endpoint::ChallengeProbe => self.prober.handle_version_check(&ctx).await,
            Endpoint::TokenRelay => self.token_relay.relay(&ctx).await,
            Endpoint::DataPlane => self.forwarder.forward(&ctx, body).await,
        }
    }
}

/// Router serving `/healthz` and relaying everything else
pub fn build_router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(relay_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn relay_handler(State(relay): State<Arc<Relay>>, request: Request) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        host = %host,
        method = %request.method(),
        path = %request.uri().path(),
    );

    async move {
        match relay.handle(request_id, request).await {
            Ok(response) => response,
            Err(e) => {
                if e.status_code().is_server_error() {
                    relay.output.error(&e.to_string());
                } else {
                    relay.output.warning(&e.to_string());
                }
                e.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

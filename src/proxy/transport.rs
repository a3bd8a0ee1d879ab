//! Outbound HTTP to upstream registries and token issuers

use crate::cli::config::ProxyConfig;
use crate::error::handlers::UpstreamErrorHandler;
use crate::error::{ProxyError, Result};
use axum::body::{Body, HttpBody};
use axum::http::{HeaderMap, HeaderName};
use axum::response::Response;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use reqwest::{Client, RequestBuilder, redirect};
use std::time::Duration;

const MAX_FOLLOWED_REDIRECTS: usize = 10;

/// Pair of pre-built clients sharing one timeout policy.
///
/// Cloning is cheap; both clients share their connection pools.
#[derive(Debug, Clone)]
pub struct UpstreamTransport {
    following: Client,
    manual: Client,
    timeout: Duration,
}

impl UpstreamTransport {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let build = |policy: redirect::Policy| {
            Client::builder()
                .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
                .read_timeout(Duration::from_secs(config.upstream_timeout_secs))
                .pool_idle_timeout(Duration::from_secs(90))
                .user_agent(config.user_agent.as_str())
                .redirect(policy)
                .build()
                .map_err(|e| ProxyError::Config(format!("Failed to create HTTP client: {}", e)))
        };

        Ok(Self {
            following: build(redirect::Policy::limited(MAX_FOLLOWED_REDIRECTS))?,
            manual: build(redirect::Policy::none())?,
            timeout: Duration::from_secs(config.upstream_timeout_secs),
        })
    }

    /// Client that follows redirects, or one that hands 3xx responses back
    pub fn client(&self, follow_redirects: bool) -> &Client {
        if follow_redirects {
            &self.following
        } else {
            &self.manual
        }
    }

    /// Send one upstream call, bounded by the timeout on response headers.
    ///
    /// Body reads are bounded per read, so large blobs stream for as long as
    /// data keeps arriving.
    pub async fn send(&self, request: RequestBuilder, context: &str) -> Result<reqwest::Response> {
        match tokio::time::timeout(self.timeout, request.send()).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(UpstreamErrorHandler::from_transport(e, context)),
            Err(_) => Err(UpstreamErrorHandler::elapsed(context, self.timeout)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Headers that describe one connection, never forwarded in either direction
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "proxy-connection"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

pub fn copy_response_headers(source: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(source.len());
    for (name, value) in source.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Hand an upstream response to the client unchanged, body streamed
pub fn passthrough(response: reqwest::Response) -> Response {
    let status = response.status();
    let headers = copy_response_headers(response.headers());
    let mut out = Response::new(Body::from_stream(response.bytes_stream()));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

/// Whether the inbound request carries a body worth forwarding.
///
/// Judged from the body itself: HTTP/2 and chunked requests often carry no
/// `Content-Length`.
pub fn has_request_body(body: &Body) -> bool {
    !body.is_end_stream()
}

/// Stream an inbound body to the upstream without buffering it.
///
/// A small task pumps chunks through a bounded channel; dropping the upstream
/// request (client went away) closes the channel and ends the task.
pub fn stream_request_body(body: Body) -> reqwest::Body {
    let (mut tx, rx) = futures::channel::mpsc::channel::<std::result::Result<Bytes, std::io::Error>>(8);
    tokio::spawn(async move {
        let mut chunks = body.into_data_stream();
        while let Some(chunk) = chunks.next().await {
            let item = chunk.map_err(std::io::Error::other);
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });
    reqwest::Body::wrap_stream(rx)
}

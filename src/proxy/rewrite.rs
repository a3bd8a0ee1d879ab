//! Response rewriting: upstream hostnames in bodies and link headers become ours
//!
//! Textual API bodies are buffered (up to a limit) and rewritten; everything
//! else streams straight through. Manifests and blobs are content-addressed
//! and never touched.

use crate::error::Result;
use crate::error::handlers::UpstreamErrorHandler;
use crate::logging::Logger;
use crate::proxy::transport::copy_response_headers;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use std::time::Duration;

type UpstreamStream = BoxStream<'static, reqwest::Result<Bytes>>;

/// Literal `upstream host -> proxy host` substitution for one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRule {
    from: String,
    to: String,
}

impl RewriteRule {
    pub fn new(upstream_authority: impl Into<String>, proxy_host: impl Into<String>) -> Self {
        Self {
            from: upstream_authority.into(),
            to: proxy_host.into(),
        }
    }

    fn is_noop(&self) -> bool {
        self.from.is_empty() || self.from == self.to
    }

    /// Rewritten text, or `None` when nothing matched
    pub fn apply(&self, text: &str) -> Option<String> {
        if self.is_noop() || !text.contains(self.from.as_str()) {
            return None;
        }
        Some(text.replace(self.from.as_str(), &self.to))
    }

    pub fn apply_bytes(&self, body: &[u8]) -> Option<Bytes> {
        let text = std::str::from_utf8(body).ok()?;
        self.apply(text).map(Bytes::from)
    }
}

/// Whether a response body may be rewritten at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPolicy {
    Rewritable,
    /// Bytes are covered by a digest
    Verbatim,
}

impl BodyPolicy {
    /// `/v2/<name>/manifests/<ref>` and `/v2/<name>/blobs/<digest>` are verbatim
    pub fn for_path(path: &str) -> Self {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let content_addressed = segments.len() >= 4
            && segments[0] == "v2"
            && matches!(segments[segments.len() - 2], "manifests" | "blobs");
        if content_addressed {
            BodyPolicy::Verbatim
        } else {
            BodyPolicy::Rewritable
        }
    }
}

/// How a body should be treated, judged from its headers alone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyClass {
    Textual,
    Binary,
    /// No type, or a generic one: sniff the first byte
    Unknown,
}

fn classify(headers: &HeaderMap) -> BodyClass {
    let content_type = match headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()) {
        Some(value) => value.to_ascii_lowercase(),
        None => return BodyClass::Unknown,
    };
    let essence = content_type.split(';').next().unwrap_or_default().trim();

    if essence.is_empty()
        || essence == "application/octet-stream"
        || essence == "binary/octet-stream"
    {
        BodyClass::Unknown
    } else if essence.contains("json")
        || essence.starts_with("text/")
        || essence.contains("xml")
        || essence.contains("javascript")
    {
        BodyClass::Textual
    } else {
        BodyClass::Binary
    }
}

fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"))
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// What buffering produced
enum Buffered {
    /// Whole body in memory
    Complete(Vec<Bytes>),
    /// Prefix in memory, rest still on the wire
    Partial(Vec<Bytes>, UpstreamStream),
}

#[derive(Debug, Clone)]
pub struct ResponseRewriter {
    max_rewrite_bytes: usize,
    /// Longest wait for one body chunk while buffering
    read_timeout: Duration,
    output: Logger,
}

impl ResponseRewriter {
    pub fn new(max_rewrite_bytes: usize, read_timeout: Duration, output: Logger) -> Self {
        Self {
            max_rewrite_bytes,
            read_timeout,
            output,
        }
    }

    pub async fn rewrite(
        &self,
        response: reqwest::Response,
        rule: &RewriteRule,
        method: &Method,
        policy: BodyPolicy,
    ) -> Result<Response> {
        let status = response.status();
        let mut headers = copy_response_headers(response.headers());
        rewrite_link_headers(&mut headers, rule);

        if *method == Method::HEAD
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return Ok(build(status, headers, Body::empty()));
        }

        let class = classify(&headers);
        let oversized = declared_length(&headers).is_some_and(|len| len > self.max_rewrite_bytes as u64);
        if policy == BodyPolicy::Verbatim
            || class == BodyClass::Binary
            || oversized
            || is_encoded(&headers)
            || rule.is_noop()
        {
            return Ok(build(status, headers, Body::from_stream(response.bytes_stream())));
        }

        let mut upstream: UpstreamStream = response.bytes_stream().boxed();
        let mut prefix = Vec::new();

        if class == BodyClass::Unknown {
            match self.sniff_json(&mut upstream, &mut prefix).await? {
                Some(true) => {}
                Some(false) => {
                    return Ok(build(status, headers, resume(prefix, upstream)));
                }
                // Whitespace or nothing at all: nothing to rewrite
                None => return Ok(build(status, headers, Body::from(concat(prefix)))),
            }
        }

        match self.buffer(upstream, prefix).await? {
            Buffered::Complete(chunks) => {
                let original = concat(chunks);
                match rule.apply_bytes(&original) {
                    Some(rewritten) => {
                        self.output.detail(&format!(
                            "Rewrote body: {} -> {} bytes",
                            original.len(),
                            rewritten.len()
                        ));
                        headers.remove(header::CONTENT_LENGTH);
                        Ok(build(status, headers, Body::from(rewritten)))
                    }
                    None => Ok(build(status, headers, Body::from(original))),
                }
            }
            Buffered::Partial(chunks, rest) => {
                self.output.warning(&format!(
                    "Textual body exceeds {} bytes, streaming without rewrite",
                    self.max_rewrite_bytes
                ));
                Ok(build(status, headers, resume(chunks, rest)))
            }
        }
    }

    async fn buffer(&self, mut upstream: UpstreamStream, mut chunks: Vec<Bytes>) -> Result<Buffered> {
        let mut total: usize = chunks.iter().map(Bytes::len).sum();
        while total <= self.max_rewrite_bytes {
            match self.next_chunk(&mut upstream).await? {
                Some(chunk) => {
                    total += chunk.len();
                    chunks.push(chunk);
                }
                None => return Ok(Buffered::Complete(chunks)),
            }
        }
        Ok(Buffered::Partial(chunks, upstream))
    }

    /// Read until the first non-whitespace byte. `Some(true)` when it opens a
    /// JSON object or array, `None` when the body ended first.
    async fn sniff_json(&self, upstream: &mut UpstreamStream, prefix: &mut Vec<Bytes>) -> Result<Option<bool>> {
        while let Some(chunk) = self.next_chunk(upstream).await? {
            let first = chunk.iter().copied().find(|b| !b.is_ascii_whitespace());
            prefix.push(chunk);
            if let Some(byte) = first {
                return Ok(Some(byte == b'{' || byte == b'['));
            }
        }
        Ok(None)
    }

    /// One body chunk; a stalled upstream is a timeout, not a hang
    async fn next_chunk(&self, upstream: &mut UpstreamStream) -> Result<Option<Bytes>> {
        match tokio::time::timeout(self.read_timeout, upstream.next()).await {
            Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
            Ok(Some(Err(e))) => Err(UpstreamErrorHandler::from_transport(e, "response body")),
            Ok(None) => Ok(None),
            Err(_) => Err(UpstreamErrorHandler::elapsed("response body", self.read_timeout)),
        }
    }
}

fn concat(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let mut joined = Vec::with_capacity(chunks.iter().map(Bytes::len).sum());
            for chunk in chunks {
                joined.extend_from_slice(&chunk);
            }
            Bytes::from(joined)
        }
    }
}

/// Already-read chunks followed by the untouched remainder
fn resume(prefix: Vec<Bytes>, rest: UpstreamStream) -> Body {
    Body::from_stream(stream::iter(prefix.into_iter().map(Ok)).chain(rest))
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// `Location` and `Link` may carry absolute upstream URLs (upload sessions, pagination)
fn rewrite_link_headers(headers: &mut HeaderMap, rule: &RewriteRule) {
    for name in [header::LOCATION, header::LINK, header::CONTENT_LOCATION] {
        let rewritten: Vec<HeaderValue> = headers
            .get_all(&name)
            .iter()
            .map(|value| {
                value
                    .to_str()
                    .ok()
                    .and_then(|text| rule.apply(text))
                    .and_then(|text| HeaderValue::from_str(&text).ok())
                    .unwrap_or_else(|| value.clone())
            })
            .collect();
        if rewritten.is_empty() {
            continue;
        }
        headers.remove(&name);
        for value in rewritten {
            headers.append(name.clone(), value);
        }
    }
}

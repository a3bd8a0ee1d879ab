//! Mock upstream registry and relay helpers shared by the integration tests

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::{HeaderMap, Method, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, put},
};
use registry_relay::cli::config::{ProxyConfig, RouteConfig};
use registry_relay::logging::Logger;
use registry_relay::proxy::routes::UpstreamKind;
use registry_relay::proxy::server::{Relay, build_router};
use futures::StreamExt;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const PROXY_HOST: &str = "docker.mirror.test";
pub const PASSTHROUGH_HOST: &str = "dl.mirror.test";
pub const REGISTRY_HOST: &str = "ghcr.mirror.test";
pub const MOCK_SERVICE: &str = "mock.registry";
pub const GOOD_TOKEN: &str = "Bearer good-token";

#[derive(Clone)]
struct MockState {
    /// `http://127.0.0.1:<port>`
    base: String,
    /// `127.0.0.1:<port>`
    authority: String,
}

impl MockState {
    fn challenge(&self, scope: Option<&str>) -> String {
        let mut value = format!(
            "Bearer realm=\"{}/token\",service=\"{}\"",
            self.base, MOCK_SERVICE
        );
        if let Some(scope) = scope {
            value.push_str(&format!(",scope=\"{}\"", scope));
        }
        value
    }
}

fn unauthorized(challenge: Option<String>) -> Response {
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({"errors": [{"code": "UNAUTHORIZED", "message": "authentication required"}]})),
    )
        .into_response();
    if let Some(challenge) = challenge {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, challenge.parse().unwrap());
    }
    response
}

async fn version_check(State(state): State<MockState>, headers: HeaderMap) -> Response {
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value == GOOD_TOKEN => (StatusCode::OK, Json(json!({}))).into_response(),
        _ => unauthorized(Some(state.challenge(None))),
    }
}

async fn token(Query(params): Query<Vec<(String, String)>>, headers: HeaderMap) -> Json<Value> {
    Json(json!({
        "token": "mock-token",
        "params": params,
        "authorized": headers.contains_key(header::AUTHORIZATION),
    }))
}

async fn manifest(State(state): State<MockState>, headers: HeaderMap) -> Response {
    match headers.get(header::AUTHORIZATION) {
        Some(value) if value == GOOD_TOKEN => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/vnd.docker.distribution.manifest.v2+json",
            )],
            r#"{"schemaVersion":2,"config":{"digest":"sha256:abc"}}"#,
        )
            .into_response(),
        _ => unauthorized(Some(
            state.challenge(Some("repository:library/busybox:pull")),
        )),
    }
}

async fn catalog(State(state): State<MockState>) -> Json<Value> {
    Json(json!({
        "repositories": ["library/busybox"],
        "next": format!("{}/v2/_catalog?last=library%2Fbusybox", state.base),
    }))
}

async fn blob_redirect() -> Response {
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(header::LOCATION, "/storage/blob-abc?sig=xyz")],
    )
        .into_response()
}

async fn storage(method: Method, headers: HeaderMap) -> Response {
    if headers.contains_key(header::AUTHORIZATION) {
        return (StatusCode::BAD_REQUEST, "credentials leaked to storage").into_response();
    }
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::HeaderName::from_static("x-seen-method"), method.to_string()),
        ],
        Bytes::from_static(b"\x1f\x8blayer-bytes"),
    )
        .into_response()
}

async fn denied_redirect() -> Response {
    (
        StatusCode::TEMPORARY_REDIRECT,
        [(header::LOCATION, "/storage/denied")],
    )
        .into_response()
}

async fn storage_denied() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::CONTENT_TYPE, "application/xml")],
        "<Error><Code>AccessDenied</Code></Error>",
    )
        .into_response()
}

/// JSON-looking config blob served as octet-stream
async fn oci_blob(State(state): State<MockState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        format!(r#"{{"subject":"{}/owner/app"}}"#, state.authority),
    )
        .into_response()
}

async fn oci_manifest(State(state): State<MockState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/vnd.oci.image.manifest.v1+json")],
        format!(r#"{{"schemaVersion":2,"subject":"{}/owner/app"}}"#, state.authority),
    )
        .into_response()
}

/// No content type at all: the relay has to sniff
async fn tags_list(State(state): State<MockState>) -> Response {
    Response::new(Body::from(format!(
        r#"{{"name":"{}/owner/app","tags":["v1"]}}"#,
        state.authority
    )))
}

async fn tags_moved() -> Response {
    (StatusCode::FOUND, [(header::LOCATION, "/v2/owner/app/tags/list")]).into_response()
}

async fn notes(State(state): State<MockState>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        format!("plain text from {}", state.authority),
    )
        .into_response()
}

/// Headers and a first chunk, then nothing ever again
async fn stalled() -> Response {
    let first = futures::stream::once(async {
        Ok::<_, std::io::Error>(Bytes::from_static(br#"{"tags":["#))
    });
    let body = first.chain(futures::stream::pending());
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(body),
    )
        .into_response()
}

async fn broken() -> Response {
    unauthorized(None)
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

async fn upload(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> Response {
    let amz = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        StatusCode::CREATED,
        [(
            header::LOCATION,
            format!("{}/v2/library/busybox/blobs/sha256:abc", state.base),
        )],
        Json(json!({ "received": body.len(), "amz": amz })),
    )
        .into_response()
}

/// Serve the mock registry on an ephemeral port
pub async fn spawn_upstream() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = MockState {
        base: format!("http://{}", addr),
        authority: addr.to_string(),
    };

    let app = Router::new()
        .route("/v2/", get(version_check))
        .route("/token", get(token))
        .route("/v2/library/busybox/manifests/latest", get(manifest))
        .route("/v2/_catalog", get(catalog))
        .route("/v2/library/busybox/blobs/layer1", get(blob_redirect))
        .route("/storage/blob-abc", get(storage))
        .route("/v2/library/broken/manifests/latest", get(broken))
        .route("/v2/library/slow/manifests/latest", get(slow))
        .route("/v2/library/busybox/blobs/uploads/123", put(upload))
        .route("/v2/library/busybox/blobs/layer2", get(denied_redirect))
        .route("/storage/denied", get(storage_denied))
        .route("/v2/owner/app/blobs/:digest", get(oci_blob))
        .route("/v2/owner/app/manifests/:reference", get(oci_manifest))
        .route("/v2/owner/app/tags/list", get(tags_list))
        .route("/v2/owner/app/tags/moved", get(tags_moved))
        .route("/v2/owner/app/notes", get(notes))
        .route("/v2/owner/app/stalled", get(stalled))
        .route("/v2/owner/app/blobs/uploads/1", put(upload))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn relay_config(upstream: SocketAddr) -> ProxyConfig {
    let base = format!("http://{}", upstream);
    ProxyConfig {
        listen: "127.0.0.1:0".to_string(),
        routes: vec![
            RouteConfig::new(PROXY_HOST, base.clone()).with_kind(UpstreamKind::DockerHub),
            RouteConfig::new(REGISTRY_HOST, base.clone()).with_kind(UpstreamKind::Registry),
            RouteConfig::new(PASSTHROUGH_HOST, base).with_kind(UpstreamKind::Passthrough),
        ],
        upstream_timeout_secs: 1,
        ..ProxyConfig::default()
    }
}

pub fn relay_router(config: ProxyConfig) -> Router {
    let relay = Relay::new(config, Logger::new("test", false)).unwrap();
    build_router(Arc::new(relay))
}

/// Send one request through a fresh relay for `upstream`
pub async fn send(upstream: SocketAddr, request: Request<Body>) -> Response {
    relay_router(relay_config(upstream))
        .oneshot(request)
        .await
        .unwrap()
}

pub fn get_request(host: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
